use keel::{
    Cancelled, CancellationToken, ColumnDef, CommandBuilder, Database, Driver, Entity,
    EntityMetadata, Order, Result, Value, Variant, col, entity_fields,
    stream::{self, StreamExt},
};
use std::{
    sync::{
        Arc, LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use time::{PrimitiveDateTime, macros::datetime};
use tokio::sync::{Mutex, mpsc};

#[derive(Default, Debug, Clone, PartialEq)]
struct Reading {
    id: i64,
    sensor: String,
    value: f64,
    taken: Option<PrimitiveDateTime>,
}

impl Entity for Reading {
    fn describe(variant: Variant) -> Result<EntityMetadata> {
        EntityMetadata::builder("Reading", variant)
            .table("keel_readings")
            .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
            .column(ColumnDef::new("sensor", Value::Varchar(None)).size(16))
            .column(ColumnDef::new("value", Value::Float64(None)))
            .column(ColumnDef::new("taken", Value::Timestamp(None)).nullable())
            .build()
    }
    entity_fields!(id, sensor, value, taken);
}

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn reading(i: usize) -> Reading {
    let start = datetime!(2024-03-01 08:00:00);
    Reading {
        sensor: format!("s{}", i % 4),
        value: i as f64 * 0.5,
        taken: Some(start + Duration::from_secs(i as u64 * 60)),
        ..Default::default()
    }
}

pub async fn bulk<D: Driver>(db: &Database<D>) {
    let _lock = MUTEX.lock().await;

    db.drop_table::<Reading>(true)
        .await
        .expect("Failed to drop the Reading table");
    db.create_table::<Reading>(false)
        .await
        .expect("Failed to create the Reading table");

    // Load from an iterator, with progress
    let progress = Arc::new(std::sync::Mutex::new(Vec::<u64>::new()));
    let total = Reading::bulk_load()
        .batch_size(100)
        .notify_after(200, {
            let progress = progress.clone();
            move |copied| {
                if let Ok(mut progress) = progress.lock() {
                    progress.push(copied);
                }
            }
        })
        .load(db, (0..1000).map(reading))
        .await
        .expect("Failed to bulk load the readings");
    assert_eq!(total, 1000);
    assert_eq!(
        *progress.lock().expect("Progress lock"),
        [200, 400, 600, 800, 1000]
    );
    assert_eq!(
        Reading::select().count(db).await.expect("Failed to count"),
        1000
    );
    let last = Reading::select()
        .order_by("id", Order::DESC)
        .first(db)
        .await
        .expect("Failed to select the last reading")
        .expect("No reading was loaded");
    assert_eq!(last.sensor, "s3");
    assert_eq!(last.value, 499.5);
    assert_eq!(last.taken, Some(datetime!(2024-03-01 08:00:00) + Duration::from_secs(999 * 60)));

    // Load from a channel fed by another task
    let (sender, receiver) = mpsc::channel(16);
    let producer = keel::spawn(async move {
        for i in 1000..1050 {
            if sender.send(reading(i)).await.is_err() {
                break;
            }
        }
    });
    let total = Reading::bulk_load()
        .batch_size(8)
        .load_channel(db, receiver)
        .await
        .expect("Failed to bulk load from the channel");
    producer.await.expect("The producer panicked");
    assert_eq!(total, 50);
    assert_eq!(
        Reading::select()
            .filter(col("value").ge(500.0))
            .count(db)
            .await
            .expect("Failed to count"),
        50
    );

    // A cancelled load copies nothing
    let token = CancellationToken::new();
    token.cancel();
    let error = Reading::bulk_load()
        .cancel_on(token)
        .load(db, (0..10).map(reading))
        .await
        .expect_err("A cancelled load must fail");
    assert!(error.downcast_ref::<Cancelled>().is_some(), "{error:?}");
    assert_eq!(
        Reading::select().count(db).await.expect("Failed to count"),
        1050
    );

    // Load from an asynchronous stream
    let readings = stream::iter(1050..1100).then(|i| async move {
        tokio::task::yield_now().await;
        reading(i)
    });
    let total = Reading::bulk_load()
        .batch_size(16)
        .load_stream(db, readings)
        .await
        .expect("Failed to bulk load from a stream");
    assert_eq!(total, 50);
    assert_eq!(
        Reading::select().count(db).await.expect("Failed to count"),
        1100
    );

    // Cancelling while the source is consumed stops the load
    let token = CancellationToken::new();
    let consumed = Arc::new(AtomicUsize::new(0));
    let readings = stream::iter(1100..1400).map({
        let token = token.clone();
        let consumed = consumed.clone();
        move |i| {
            if consumed.fetch_add(1, Ordering::SeqCst) + 1 == 150 {
                token.cancel();
            }
            reading(i)
        }
    });
    let error = Reading::bulk_load()
        .batch_size(100)
        .cancel_on(token)
        .load_stream(db, readings)
        .await
        .expect_err("The load was cancelled midway");
    assert!(error.downcast_ref::<Cancelled>().is_some(), "{error:?}");
    assert_eq!(consumed.load(Ordering::SeqCst), 150);
    let copied = Reading::select().count(db).await.expect("Failed to count") - 1100;
    // At most the batches flushed before the cancellation
    assert!(copied == 0 || copied == 100, "{copied} rows were copied");
}
