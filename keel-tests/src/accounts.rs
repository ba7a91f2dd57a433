use keel::{
    ColumnDef, CommandBuilder, Database, Driver, Entity, EntityMetadata, MergeOutcome, Result,
    Value, Variant, col, entity_fields,
};
use std::sync::LazyLock;
use tokio::sync::Mutex;

#[derive(Default, Debug, Clone, PartialEq)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
    version: i64,
}

impl Entity for Account {
    fn describe(variant: Variant) -> Result<EntityMetadata> {
        EntityMetadata::builder("Account", variant)
            .table("keel_accounts")
            .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
            .column(ColumnDef::new("owner", Value::Varchar(None)).size(60))
            .column(ColumnDef::new("balance", Value::Int64(None)))
            .column(ColumnDef::new("version", Value::Int64(None)).concurrency_token())
            .build()
    }
    entity_fields!(id, owner, balance, version);
}

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn accounts<D: Driver>(db: &Database<D>) {
    let _lock = MUTEX.lock().await;

    db.drop_table::<Account>(true)
        .await
        .expect("Failed to drop the Account table");
    db.create_table::<Account>(false)
        .await
        .expect("Failed to create the Account table");

    // The engine starts the token at 1
    let mut account = Account {
        owner: "Giulia".into(),
        balance: 100,
        ..Default::default()
    };
    Account::insert()
        .value(&mut account)
        .execute(db)
        .await
        .expect("Failed to insert the account");
    assert!(account.id > 0);
    assert_eq!(account.version, 1);
    let stale = account.clone();

    // Each update bumps it
    account.balance = 150;
    let affected = Account::update()
        .entity(&mut account)
        .execute(db)
        .await
        .expect("Failed to update the account");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(account.version, 2);

    // A stale copy does not overwrite the newer row
    let mut outdated = stale.clone();
    outdated.balance = 0;
    let affected = Account::update()
        .entity(&mut outdated)
        .execute(db)
        .await
        .expect("Failed to run the stale update");
    assert_eq!(affected.rows_affected, 0);
    let stored = Account::select()
        .key(account.id)
        .first(db)
        .await
        .expect("Failed to reload the account")
        .expect("The account was not found");
    assert_eq!(stored, account);

    // Merging a stale copy leaves the row alone
    let mut merged = stale.clone();
    merged.owner = "Giulia R.".into();
    let outcome = Account::merge()
        .value(&mut merged)
        .execute(db)
        .await
        .expect("Failed to merge the stale copy");
    assert_eq!(outcome, MergeOutcome::Unchanged);

    // Unless the check is turned off
    let affected = Account::update()
        .entity(&mut outdated)
        .without_concurrency_check()
        .execute(db)
        .await
        .expect("Failed to force the update");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(outdated.version, 3);
    let forced = Account::select()
        .filter(col("owner").eq("Giulia"))
        .first(db)
        .await
        .expect("Failed to reload the account")
        .expect("The account was not found");
    assert_eq!(forced.balance, 0);
    assert_eq!(forced.version, 3);

    // A targeted update leaves the token to the caller
    let affected = Account::update()
        .set_expr("balance", col("balance").add(25i64))
        .expect("Valid assignment")
        .key(account.id)
        .execute(db)
        .await
        .expect("Failed to run the targeted update");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(
        Account::select()
            .key(account.id)
            .first(db)
            .await
            .expect("Failed to reload the account")
            .map(|a| a.balance),
        Some(25)
    );
}
