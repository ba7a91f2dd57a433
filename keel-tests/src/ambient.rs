use crate::silent_logs;
use keel::{
    AmbientStatus, ColumnDef, Database, Driver, Entity, EntityMetadata, Result, ScopeMode,
    TransactionScope, UsageError, Value, Variant, entity_fields, stream::TryStreamExt,
};
use std::{pin::pin, sync::LazyLock};
use tokio::sync::Mutex;

#[derive(Default, Debug, Clone, PartialEq)]
struct Memo {
    id: i64,
    text: String,
}

impl Entity for Memo {
    fn describe(variant: Variant) -> Result<EntityMetadata> {
        EntityMetadata::builder("Memo", variant)
            .table("keel_memos")
            .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
            .column(ColumnDef::new("text", Value::Varchar(None)))
            .build()
    }
    entity_fields!(id, text);
}

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

async fn write<D: Driver>(db: &Database<D>, text: &str) {
    let mut memo = Memo {
        text: text.into(),
        ..Default::default()
    };
    Memo::insert()
        .value(&mut memo)
        .execute(db)
        .await
        .expect("Failed to insert a memo");
}

async fn count<D: Driver>(db: &Database<D>) -> u64 {
    Memo::select()
        .count(db)
        .await
        .expect("Failed to count the memos")
}

async fn texts<D: Driver>(db: &Database<D>) -> Vec<String> {
    Memo::select()
        .list(db)
        .await
        .expect("Failed to list the memos")
        .into_iter()
        .map(|m| m.text)
        .collect()
}

pub async fn ambient<D: Driver>(db: &Database<D>) {
    let _lock = MUTEX.lock().await;

    db.drop_table::<Memo>(true)
        .await
        .expect("Failed to drop the Memo table");
    db.create_table::<Memo>(false)
        .await
        .expect("Failed to create the Memo table");

    // Uncommitted writes are visible only inside the scope
    let scope = TransactionScope::new(ScopeMode::Join);
    scope
        .enter(async {
            write(db, "draft").await;
            assert_eq!(count(db).await, 1);
        })
        .await;
    assert_eq!(count(db).await, 0);
    scope.dispose().await.expect("Failed to dispose the scope");
    assert_eq!(scope.ambient().status(), AmbientStatus::RolledBack);
    assert_eq!(count(db).await, 0);

    // Completed scopes commit
    TransactionScope::run(ScopeMode::Join, |scope| async move {
        write(db, "kept").await;
        scope.complete().await
    })
    .await
    .expect("Failed to run the committed scope");
    assert_eq!(texts(db).await, ["kept"]);

    // A joined scope cannot commit on its own
    let outer = TransactionScope::new(ScopeMode::Join);
    outer
        .enter(async {
            let inner = TransactionScope::new(ScopeMode::Join);
            assert_eq!(inner.ambient(), outer.ambient());
            assert_eq!(outer.ambient().ref_count(), 2);
            inner.enter(write(db, "joined")).await;
            inner.complete().await.expect("Failed to complete the inner scope");
            inner.dispose().await.expect("Failed to dispose the inner scope");
            assert_eq!(outer.ambient().status(), AmbientStatus::Active);
        })
        .await;
    outer.dispose().await.expect("Failed to dispose the outer scope");
    assert_eq!(texts(db).await, ["kept"]);

    // A new ambient commits independently of the one it interrupts
    let outer = TransactionScope::new(ScopeMode::Join);
    outer
        .enter(async {
            let inner = TransactionScope::new(ScopeMode::StartNew);
            assert_ne!(inner.ambient(), outer.ambient());
            assert_eq!(inner.ambient().previous(), Some(outer.ambient()));
            inner.enter(write(db, "independent")).await;
            inner.complete().await.expect("Failed to complete the inner scope");
            inner.dispose().await.expect("Failed to dispose the inner scope");
            assert_eq!(inner.ambient().status(), AmbientStatus::Committed);
            write(db, "discarded").await;
        })
        .await;
    outer.dispose().await.expect("Failed to dispose the outer scope");
    let mut stored = texts(db).await;
    stored.sort();
    assert_eq!(stored, ["independent", "kept"]);

    // An open stream holds the ambient connection, other statements fail fast
    let scope = TransactionScope::new(ScopeMode::Join);
    scope
        .enter(async {
            {
                let mut memos = pin!(Memo::select().stream(db));
                let first = memos
                    .try_next()
                    .await
                    .expect("Failed to read the first memo");
                assert!(first.is_some());
                silent_logs! {
                    let error = Memo::select()
                        .count(db)
                        .await
                        .expect_err("The stream still holds the connection");
                    assert!(matches!(
                        error.downcast_ref::<UsageError>(),
                        Some(UsageError::StreamOpen)
                    ));
                }
            }
            assert_eq!(count(db).await, 2);
        })
        .await;
    scope.dispose().await.expect("Failed to dispose the scope");
}
