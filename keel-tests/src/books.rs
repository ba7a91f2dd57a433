use keel::{
    ColumnDef, CommandBuilder, Database, Driver, Entity, EntityMetadata, MergeOrder, MergeOutcome,
    Order, Result, Value, Variant, col, entity_fields,
    stream::{StreamExt, TryStreamExt},
};
use rust_decimal::Decimal;
use std::{pin::pin, sync::LazyLock};
use time::{Date, Month};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default, Debug, Clone, PartialEq)]
struct Book {
    id: i64,
    title: String,
    author: String,
    year: i32,
    price: Option<Decimal>,
    published: Option<Date>,
    code: Uuid,
    available: bool,
}

impl Entity for Book {
    fn describe(variant: Variant) -> Result<EntityMetadata> {
        EntityMetadata::builder("Book", variant)
            .table("keel_books")
            .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
            .column(ColumnDef::new("title", Value::Varchar(None)).size(200))
            .column(ColumnDef::new("author", Value::Varchar(None)).size(100))
            .column(ColumnDef::new("year", Value::Int32(None)))
            .column(ColumnDef::new("price", Value::Decimal(None, 0, 0)).precision(8, 2).nullable())
            .column(ColumnDef::new("published", Value::Date(None)).nullable())
            .column(ColumnDef::new("code", Value::Uuid(None)))
            .column(ColumnDef::new("available", Value::Boolean(None)))
            .unique(["code"])
            .build()
    }
    entity_fields!(id, title, author, year, price, published, code, available);
}

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn library() -> Vec<Book> {
    vec![
        Book {
            title: "Il barone rampante".into(),
            author: "Italo Calvino".into(),
            year: 1957,
            price: Some(Decimal::new(1250, 2)),
            published: Date::from_calendar_date(1957, Month::June, 1).ok(),
            code: Uuid::new_v4(),
            available: true,
            ..Default::default()
        },
        Book {
            title: "Le città invisibili".into(),
            author: "Italo Calvino".into(),
            year: 1972,
            price: Some(Decimal::new(2025, 2)),
            published: None,
            code: Uuid::new_v4(),
            available: true,
            ..Default::default()
        },
        Book {
            title: "Il nome della rosa".into(),
            author: "Umberto Eco".into(),
            year: 1980,
            price: None,
            published: Date::from_calendar_date(1980, Month::September, 1).ok(),
            code: Uuid::new_v4(),
            available: false,
            ..Default::default()
        },
    ]
}

pub async fn books<D: Driver>(db: &Database<D>) {
    let _lock = MUTEX.lock().await;

    // Setup
    db.drop_table::<Book>(true)
        .await
        .expect("Failed to drop the Book table");
    db.create_table::<Book>(false)
        .await
        .expect("Failed to create the Book table");

    // Insert and round trip
    let mut books = library();
    let affected = Book::insert()
        .values(books.iter_mut())
        .execute(db)
        .await
        .expect("Failed to insert the books");
    assert_eq!(affected.rows_affected, 3);
    assert!(books.iter().all(|b| b.id > 0), "Generated ids were not written back");
    let loaded = Book::select()
        .key(books[0].id)
        .first(db)
        .await
        .expect("Failed to select a book by key")
        .expect("The inserted book was not found");
    assert_eq!(loaded, books[0]);

    // Filters, ordering and paging
    let calvino = Book::select()
        .filter(col("author").eq("Italo Calvino"))
        .order_by("year", Order::DESC)
        .list(db)
        .await
        .expect("Failed to list the books of an author");
    assert_eq!(
        calvino.iter().map(|b| b.year).collect::<Vec<_>>(),
        [1972, 1957]
    );
    let recent = Book::select()
        .filter_text("year gt 1960 and available eq true")
        .list(db)
        .await
        .expect("Failed to list with a text filter");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].title, "Le città invisibili");
    let second = Book::select()
        .order_by("year", Order::ASC)
        .skip(1)
        .top(1)
        .list(db)
        .await
        .expect("Failed to page the books");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].year, 1972);
    let contains = Book::select()
        .filter(col("title").contains("nome"))
        .count(db)
        .await
        .expect("Failed to count");
    assert_eq!(contains, 1);
    assert_eq!(Book::select().count(db).await.expect("Failed to count"), 3);
    assert!(
        Book::select()
            .filter(col("price").is_null())
            .exists(db)
            .await
            .expect("Failed to check existence")
    );
    assert!(
        !Book::select()
            .filter(col("year").is_in([1900, 1901]))
            .exists(db)
            .await
            .expect("Failed to check existence")
    );
    let error = Book::select()
        .single(db)
        .await
        .expect_err("More than one row must be an error");
    assert!(error.to_string().contains("more"), "{error}");
    let only = Book::select()
        .filter(col("year").eq(1980))
        .single(db)
        .await
        .expect("Failed to select a single book")
        .expect("The book was not found");
    assert_eq!(only.author, "Umberto Eco");

    // Stream
    {
        let mut stream = pin!(Book::select().order_by("id", Order::ASC).stream(db));
        let mut titles = Vec::new();
        while let Some(book) = stream.next().await {
            titles.push(book.expect("Failed to read a streamed book").title);
        }
        assert_eq!(
            titles,
            books.iter().map(|b| b.title.clone()).collect::<Vec<_>>()
        );
    }
    let years: Vec<i32> = Book::select()
        .filter(col("year").lt(1975))
        .order_by("year", Order::ASC)
        .stream(db)
        .map_ok(|b| b.year)
        .try_collect()
        .await
        .expect("Failed to collect the stream");
    assert_eq!(years, [1957, 1972]);

    // Tracked update writes only what changed
    let mut tracked = Book::select()
        .key(books[2].id)
        .first_tracked(db)
        .await
        .expect("Failed to select a tracked book")
        .expect("The book was not found");
    let unchanged = Book::update()
        .tracked(&mut tracked)
        .execute(db)
        .await
        .expect("Failed to run an empty tracked update");
    assert_eq!(unchanged.rows_affected, 0);
    tracked
        .set_field("price", Some(Decimal::new(1800, 2)))
        .expect("Failed to set the price");
    tracked.modify(|b| b.available = true);
    assert_eq!(tracked.changed_fields(), ["price", "available"]);
    let affected = Book::update()
        .tracked(&mut tracked)
        .execute(db)
        .await
        .expect("Failed to update the tracked book");
    assert_eq!(affected.rows_affected, 1);
    assert!(!tracked.is_changed());
    let reloaded = Book::select()
        .key(books[2].id)
        .first(db)
        .await
        .expect("Failed to reload the book")
        .expect("The book was not found");
    assert_eq!(reloaded.price, Some(Decimal::new(18, 0)));
    assert!(reloaded.available);

    // Targeted update
    let affected = Book::update()
        .set_expr("year", col("year").add(1))
        .expect("Valid assignment")
        .filter(col("author").eq("Italo Calvino"))
        .execute(db)
        .await
        .expect("Failed to run a targeted update");
    assert_eq!(affected.rows_affected, 2);
    let years: Vec<i32> = Book::select()
        .filter(col("author").eq("Italo Calvino"))
        .order_by("year", Order::ASC)
        .list(db)
        .await
        .expect("Failed to list")
        .into_iter()
        .map(|b| b.year)
        .collect();
    assert_eq!(years, [1958, 1973]);
    assert!(Book::update().set("missing", 1).is_err());
    assert!(Book::update().set("id", 1).is_err());

    // Merge
    let mut merged = Book {
        title: "Se una notte d'inverno un viaggiatore".into(),
        author: "Italo Calvino".into(),
        year: 1979,
        code: Uuid::new_v4(),
        available: true,
        ..Default::default()
    };
    let outcome = Book::merge()
        .value(&mut merged)
        .execute(db)
        .await
        .expect("Failed to merge a new book");
    assert_eq!(outcome, MergeOutcome::Inserted);
    assert!(merged.id > 0);
    merged.price = Some(Decimal::new(15, 0));
    let outcome = Book::merge()
        .value(&mut merged)
        .execute(db)
        .await
        .expect("Failed to merge an existing book");
    assert_eq!(outcome, MergeOutcome::Updated);
    merged.available = false;
    let outcome = Book::merge()
        .value(&mut merged)
        .order(MergeOrder::InsertThenUpdate)
        .execute(db)
        .await
        .expect("Failed to merge inserting first");
    assert_eq!(outcome, MergeOutcome::Updated);
    let stored = Book::select()
        .key(merged.id)
        .first(db)
        .await
        .expect("Failed to reload the merged book")
        .expect("The merged book was not found");
    assert_eq!(stored, merged);
    assert_eq!(Book::select().count(db).await.expect("Failed to count"), 4);

    // Delete
    let affected = Book::delete()
        .entity(&merged)
        .expect("Book has a key")
        .execute(db)
        .await
        .expect("Failed to delete a book");
    assert_eq!(affected.rows_affected, 1);
    let affected = Book::delete()
        .key(-1i64)
        .execute(db)
        .await
        .expect("Failed to delete a missing book");
    assert_eq!(affected.rows_affected, 0);
    assert!(Book::delete().execute(db).await.is_err());
    let affected = Book::delete()
        .all_rows()
        .execute(db)
        .await
        .expect("Failed to delete every book");
    assert_eq!(affected.rows_affected, 3);
    assert!(
        Book::select()
            .first(db)
            .await
            .expect("Failed to select")
            .is_none()
    );
}
