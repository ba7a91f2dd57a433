use keel::{
    AsValue, ColumnDef, CommandBuilder, Database, Driver, Entity, EntityMetadata, Error, Result,
    Row, StorageMode, Value, Variant, col, entity_fields,
    stream::TryStreamExt,
};
use std::sync::LazyLock;
use tokio::sync::Mutex;

#[derive(Default, Debug, Clone, PartialEq)]
struct OrderLine {
    sku: String,
    quantity: i32,
}

#[derive(Default, Debug, Clone, PartialEq)]
struct PurchaseOrder {
    id: i64,
    customer: String,
    notes: Option<String>,
    lines: Vec<OrderLine>,
}

const NOTES: u64 = 1;
const LINES: u64 = 2;
const LINES_ORDINAL: usize = 3;

impl Entity for PurchaseOrder {
    fn describe(variant: Variant) -> Result<EntityMetadata> {
        let lines = EntityMetadata::detail_builder("keel_order_lines")
            .column(ColumnDef::new("order_id", Value::Int64(None)))
            .column(ColumnDef::new("sku", Value::Varchar(None)).size(20))
            .column(ColumnDef::new("quantity", Value::Int32(None)))
            .build()?;
        EntityMetadata::builder("PurchaseOrder", variant)
            .table("keel_orders")
            .column(ColumnDef::new("id", Value::Int64(None)).key())
            .column(ColumnDef::new("customer", Value::Varchar(None)))
            .column(
                ColumnDef::new("notes", Value::Varchar(None))
                    .nullable()
                    .partial(NOTES),
            )
            .column(
                ColumnDef::new("lines", Value::Null)
                    .storage(StorageMode::Detail)
                    .partial(LINES),
            )
            .detail("lines", lines, [("id", "order_id")])
            .build()
    }

    entity_fields!(id, customer, notes);

    fn detail(&self, ordinal: usize) -> Vec<Row> {
        if ordinal != LINES_ORDINAL {
            return Vec::new();
        }
        self.lines
            .iter()
            .map(|l| vec![l.sku.clone().as_value(), l.quantity.as_value()].into_boxed_slice())
            .collect()
    }

    fn set_detail(&mut self, ordinal: usize, rows: Vec<Row>) -> Result<()> {
        if ordinal != LINES_ORDINAL {
            return Err(Error::msg(format!("No detail at ordinal {}", ordinal)));
        }
        self.lines = rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_vec().into_iter();
                Ok(OrderLine {
                    sku: String::try_from_value(values.next().unwrap_or(Value::Null))?,
                    quantity: i32::try_from_value(values.next().unwrap_or(Value::Null))?,
                })
            })
            .collect::<Result<_>>()?;
        self.lines.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(())
    }
}

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn line(sku: &str, quantity: i32) -> OrderLine {
    OrderLine {
        sku: sku.into(),
        quantity,
    }
}

async fn stored_lines<D: Driver>(db: &Database<D>) -> i64 {
    let rows = db
        .fetch("SELECT COUNT(*) FROM keel_order_lines")
        .await
        .expect("Failed to count the order lines");
    rows.first()
        .and_then(|r| r.values().first().cloned())
        .map(|v| i64::try_from_value(v).expect("The count is an integer"))
        .unwrap_or_default()
}

pub async fn orders<D: Driver>(db: &Database<D>) {
    let _lock = MUTEX.lock().await;

    // Setup
    db.drop_table::<PurchaseOrder>(true)
        .await
        .expect("Failed to drop the PurchaseOrder tables");
    db.create_table::<PurchaseOrder>(false)
        .await
        .expect("Failed to create the PurchaseOrder tables");

    // Insert with details
    let mut orders = vec![
        PurchaseOrder {
            id: 1,
            customer: "Lucia".into(),
            notes: Some("Leave at the door".into()),
            lines: vec![line("A-100", 2), line("B-200", 1)],
        },
        PurchaseOrder {
            id: 2,
            customer: "Marco".into(),
            notes: None,
            lines: vec![line("C-300", 5)],
        },
    ];
    let affected = PurchaseOrder::insert()
        .values(orders.iter_mut())
        .execute(db)
        .await
        .expect("Failed to insert the orders");
    assert_eq!(affected.rows_affected, 2);
    assert_eq!(stored_lines(db).await, 3);

    // Reload with every detail
    let loaded = PurchaseOrder::select()
        .key(1i64)
        .first(db)
        .await
        .expect("Failed to load an order")
        .expect("The order was not found");
    assert_eq!(loaded, orders[0]);
    let all = PurchaseOrder::select()
        .list(db)
        .await
        .expect("Failed to list the orders");
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().map(|o| o.lines.len()).sum::<usize>(), 3);

    // Partial loading
    let bare = PurchaseOrder::select()
        .key(1i64)
        .partial(0)
        .first(db)
        .await
        .expect("Failed to load a partial order")
        .expect("The order was not found");
    assert_eq!(bare.customer, "Lucia");
    assert_eq!(bare.notes, None);
    assert!(bare.lines.is_empty());
    let with_notes = PurchaseOrder::select()
        .key(1i64)
        .partial(NOTES)
        .first(db)
        .await
        .expect("Failed to load the notes")
        .expect("The order was not found");
    assert_eq!(with_notes.notes.as_deref(), Some("Leave at the door"));
    assert!(with_notes.lines.is_empty());

    // Details cannot be streamed
    let error = PurchaseOrder::select()
        .stream(db)
        .try_collect::<Vec<_>>()
        .await
        .expect_err("Streaming the lines must fail");
    assert!(error.to_string().contains("lines"), "{error}");
    let streamed: Vec<PurchaseOrder> = PurchaseOrder::select()
        .partial(NOTES)
        .stream(db)
        .try_collect()
        .await
        .expect("Failed to stream without details");
    assert_eq!(streamed.len(), 2);

    // Update replaces the lines
    let mut changed = loaded.clone();
    changed.lines = vec![line("A-100", 3), line("D-400", 1), line("E-500", 7)];
    let affected = PurchaseOrder::update()
        .entity(&mut changed)
        .execute(db)
        .await
        .expect("Failed to update the order");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(stored_lines(db).await, 4);
    let reloaded = PurchaseOrder::select()
        .key(1i64)
        .first(db)
        .await
        .expect("Failed to reload the order")
        .expect("The order was not found");
    assert_eq!(reloaded.lines, changed.lines);

    // A filter that spares the keyed order spares its lines
    let affected = PurchaseOrder::delete()
        .key(1i64)
        .filter(col("customer").eq("Marco"))
        .execute(db)
        .await
        .expect("Failed to run the filtered delete");
    assert_eq!(affected.rows_affected, 0);
    assert_eq!(stored_lines(db).await, 4);
    let spared = PurchaseOrder::select()
        .key(1i64)
        .first(db)
        .await
        .expect("Failed to reload the order")
        .expect("The order was not found");
    assert_eq!(spared, reloaded);

    // Delete removes the lines too
    let affected = PurchaseOrder::delete()
        .entity(&reloaded)
        .expect("PurchaseOrder has a key")
        .execute(db)
        .await
        .expect("Failed to delete the order");
    assert_eq!(affected.rows_affected, 1);
    assert_eq!(stored_lines(db).await, 1);
    let remaining = PurchaseOrder::select()
        .list(db)
        .await
        .expect("Failed to list the orders");
    assert_eq!(remaining, orders[1..]);
}
