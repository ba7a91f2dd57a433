use crate::{
    AsValue, Cancelled, CommandBuilder, CommandOptions, Database, Driver, Entity, EntityMetadata,
    Error, Executor, Fragment, Projection, Query, Result, SelectStatement, SqlWriter, Tracked,
    UsageError, Value,
    command::{key_predicate, load_details, materialize},
    error::raise,
    stream::{Stream, TryStreamExt},
    with_cancel,
    writer::Context,
};
use async_stream::try_stream;
use std::{marker::PhantomData, pin::pin, sync::Arc};

/// Read entities.
///
/// Every selectable column is projected, partial columns outside the
/// [`partial`](CommandBuilder::partial) mask come back as `NULL` and keep their
/// default. Detail tables in the mask are loaded with one extra round trip per
/// table.
pub struct Select<E: Entity> {
    options: CommandOptions,
    key: Option<Vec<Value>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Select<E> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            key: self.key.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for Select<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> CommandBuilder for Select<E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<E: Entity> Select<E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            key: None,
            _entity: PhantomData,
        }
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// Restrict to the row with this single column key.
    pub fn key(self, value: impl AsValue) -> Self {
        self.key_values(vec![value.as_value()])
    }

    /// Restrict to the row with this key, values in key column order.
    pub fn key_values(mut self, values: Vec<Value>) -> Self {
        self.key = Some(values);
        self
    }

    /// Compile the statement, no I/O.
    pub fn to_query(&self, writer: &dyn SqlWriter, projection: Projection) -> Result<Query> {
        let metadata = E::metadata(self.options.variant)?;
        self.compile(&metadata, writer, projection)
    }

    fn compile(
        &self,
        metadata: &EntityMetadata,
        writer: &dyn SqlWriter,
        projection: Projection,
    ) -> Result<Query> {
        let key = self
            .key
            .as_deref()
            .map(|v| key_predicate(metadata, v))
            .transpose()?;
        let filter = self.options.predicate(key)?;
        let mut context = Context::new(Fragment::SqlSelect);
        let mut sql = String::new();
        writer.write_select(
            &mut context,
            &mut sql,
            &SelectStatement {
                filter: filter.as_ref(),
                order: &self.options.order,
                top: self.options.top,
                skip: self.options.skip,
                hints: self.options.hints.as_ref(),
                ..SelectStatement::new(metadata, projection)
            },
        )?;
        Ok(context.into_query(sql, self.options.timeout))
    }

    fn prepare<D: Driver>(
        &self,
        db: &Database<D>,
        projection: Projection,
    ) -> Result<(Arc<EntityMetadata>, Query)> {
        let metadata = E::metadata(self.options.variant)?;
        let writer = db.driver().sql_writer();
        let mut query = self.compile(&metadata, writer.as_dyn(), projection)?;
        query.timeout = self.options.timeout_or(db.timeout());
        Ok((metadata, query))
    }

    /// Every matching entity, detail tables included.
    pub async fn list<D: Driver>(self, db: &Database<D>) -> Result<Vec<E>> {
        let mask = self.options.partial;
        let (metadata, query) = self.prepare(db, Projection::Columns { mask })?;
        let timeout = query.timeout;
        with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(self.options.close_connection).await?;
            let rows = db.fetch_on(&mut lease, query).await?;
            let mut entities = rows
                .into_iter()
                .map(|row| materialize::<E>(&metadata, row.values, mask))
                .collect::<Result<Vec<_>>>()?;
            load_details(db, &mut lease, &metadata, &mut entities, mask, timeout).await?;
            lease.release();
            Ok(entities)
        })
        .await
    }

    /// Lazily materialized entities. Single pass, stops when dropped or when
    /// the cancellation token fires. Detail tables cannot be streamed.
    pub fn stream<'d, D: Driver>(
        self,
        db: &'d Database<D>,
    ) -> impl Stream<Item = Result<E>> + Send + 'd {
        try_stream! {
            let mask = self.options.partial;
            let (metadata, query) = self.prepare(db, Projection::Columns { mask })?;
            if let Some(detail) = metadata
                .details
                .iter()
                .find(|d| metadata.columns[d.ordinal].is_loaded(mask))
            {
                Err(raise(UsageError::DetailColumn {
                    entity: metadata.entity.clone(),
                    field: detail.field.to_string(),
                    usage: "streams",
                }))?;
            }
            let mut lease = db.acquire(self.options.close_connection).await?;
            {
                let _streaming = lease.streaming();
                log::debug!("{}", query);
                let mut rows = pin!(lease.fetch(query));
                loop {
                    let row = match &self.options.cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => Err(raise(Cancelled)),
                            row = rows.try_next() => row,
                        },
                        None => rows.try_next().await,
                    };
                    let Some(row) = row.map_err(|e| db.translate(e))? else {
                        break;
                    };
                    yield materialize::<E>(&metadata, row.values, mask)?;
                }
            }
            lease.release();
        }
    }

    pub async fn first<D: Driver>(mut self, db: &Database<D>) -> Result<Option<E>> {
        self.options.top = Some(1);
        Ok(self.list(db).await?.into_iter().next())
    }

    /// The only matching entity, an error when more than one matches.
    pub async fn single<D: Driver>(mut self, db: &Database<D>) -> Result<Option<E>> {
        self.options.top = Some(2);
        let mut entities = self.list(db).await?;
        if entities.len() > 1 {
            let error = Error::msg(format!(
                "Expected at most one `{}`, the query returned more",
                std::any::type_name::<E>()
            ));
            log::error!("{}", error);
            return Err(error);
        }
        Ok(entities.pop())
    }

    pub async fn count<D: Driver>(self, db: &Database<D>) -> Result<u64> {
        let (_, query) = self.prepare(db, Projection::Count)?;
        let value = with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(self.options.close_connection).await?;
            let value = db.scalar_on(&mut lease, query).await?;
            lease.release();
            Ok(value)
        })
        .await?;
        Ok(value.map(u64::try_from_value).transpose()?.unwrap_or_default())
    }

    pub async fn exists<D: Driver>(self, db: &Database<D>) -> Result<bool> {
        let (_, query) = self.prepare(db, Projection::Exists)?;
        with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(self.options.close_connection).await?;
            let rows = db.fetch_on(&mut lease, query).await?;
            lease.release();
            Ok(!rows.is_empty())
        })
        .await
    }

    /// Like [`list`](Self::list), each entity starts being tracked.
    pub async fn list_tracked<D: Driver>(self, db: &Database<D>) -> Result<Vec<Tracked<E>>> {
        let variant = self.options.variant;
        self.list(db)
            .await?
            .into_iter()
            .map(|e| Tracked::with_variant(e, variant))
            .collect()
    }

    pub async fn first_tracked<D: Driver>(self, db: &Database<D>) -> Result<Option<Tracked<E>>> {
        let variant = self.options.variant;
        self.first(db)
            .await?
            .map(|e| Tracked::with_variant(e, variant))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, GenericSqlWriter, Order, Variant, col, entity_fields};
    use indoc::indoc;

    #[derive(Default, Debug, PartialEq)]
    struct Book {
        id: i32,
        title: String,
        notes: Option<String>,
    }

    impl Entity for Book {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            EntityMetadata::builder("Book", variant)
                .table("books")
                .column(ColumnDef::new("id", Value::Int32(None)).key())
                .column(ColumnDef::new("title", Value::Varchar(None)).size(200))
                .column(ColumnDef::new("notes", Value::Varchar(None)).nullable().partial(1))
                .build()
        }
        entity_fields!(id, title, notes);
    }

    #[test]
    fn compiles_key_and_filters() {
        let query = Book::select()
            .key(7)
            .filter(col("title").starts_with("Rust"))
            .partial(0)
            .to_query(&GenericSqlWriter, Projection::Columns { mask: 0 })
            .expect("select compiles");
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT [id], [title], NULL AS [notes]
                FROM [books]
                WHERE (([id] = @p0) AND ([title] LIKE @p1+'%'));"
            }
        );
        assert_eq!(query.parameters.len(), 2);
        assert_eq!(query.parameters[0].value, Value::Int32(Some(7)));
        assert_eq!(query.parameters[1].value, Value::Varchar(Some("Rust".into())));
    }

    #[test]
    fn compiles_paging_and_text_filter() {
        let query = Book::select()
            .filter_text("id gt 3")
            .order_by("title", Order::DESC)
            .skip(10)
            .top(5)
            .to_query(&GenericSqlWriter, Projection::Columns { mask: u64::MAX })
            .expect("select compiles");
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT [id], [title], [notes]
                FROM [books]
                WHERE ([id] > @p0)
                ORDER BY [title] DESC
                OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY;"
            }
        );
    }

    #[test]
    fn rejects_before_io() {
        let error = Book::select()
            .key_values(vec![Value::Int32(Some(1)), Value::Int32(Some(2))])
            .to_query(&GenericSqlWriter, Projection::Count)
            .expect_err("wrong key arity");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::KeyArity { expected: 1, actual: 2, .. })
        ));
        let error = Book::select()
            .filter(col("missing").eq(1))
            .to_query(&GenericSqlWriter, Projection::Count)
            .expect_err("unknown field");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::UnknownField { .. })
        ));
        let error = Book::select()
            .order_by("nothing", Order::ASC)
            .to_query(&GenericSqlWriter, Projection::Columns { mask: u64::MAX })
            .expect_err("unknown sort key");
        assert!(error.downcast_ref::<UsageError>().is_some());
    }

    #[test]
    fn count_and_exists() {
        let count = Book::select()
            .to_query(&GenericSqlWriter, Projection::Count)
            .expect("count compiles");
        assert_eq!(count.sql, "SELECT COUNT(*)\nFROM [books];");
        let exists = Book::select()
            .key(1)
            .to_query(&GenericSqlWriter, Projection::Exists)
            .expect("exists compiles");
        assert_eq!(exists.sql, "SELECT TOP (1) 1\nFROM [books]\nWHERE ([id] = @p0);");
    }
}
