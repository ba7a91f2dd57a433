use crate::{
    ColumnDef, CommandBuilder, CommandOptions, Database, Driver, Entity, EntityMetadata,
    Expression, Fragment, InsertStatement, Lease, Query, QueryResult, Result, RowsAffected,
    SqlWriter, UsageError,
    command::{encode_row, insert_details, typed_integer, write_back},
    error::raise,
    with_cancel,
    writer::Context,
};
use std::time::Duration;

/// Insert entities, one statement each, writing server populated values back.
pub struct Insert<'e, E: Entity> {
    options: CommandOptions,
    values: Vec<&'e mut E>,
}

impl<'e, E: Entity> Default for Insert<'e, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'e, E: Entity> CommandBuilder for Insert<'e, E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<'e, E: Entity> Insert<'e, E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, entity: &'e mut E) -> Self {
        self.values.push(entity);
        self
    }

    pub fn values(mut self, entities: impl IntoIterator<Item = &'e mut E>) -> Self {
        self.values.extend(entities);
        self
    }

    /// Compile the statement of each entity, no I/O.
    pub fn to_queries(&self, writer: &dyn SqlWriter) -> Result<Vec<Query>> {
        let metadata = E::metadata(self.options.variant)?;
        self.values
            .iter()
            .map(|e| compile_insert(writer, &metadata, &**e, None, self.options.timeout))
            .collect()
    }

    pub async fn execute<D: Driver>(self, db: &Database<D>) -> Result<RowsAffected> {
        if self.values.is_empty() {
            return Err(raise(UsageError::MissingPayload("no entity to insert")));
        }
        let metadata = E::metadata(self.options.variant)?;
        let timeout = self.options.timeout_or(db.timeout());
        let close = self.options.close_connection;
        let mut values = self.values;
        with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(close).await?;
            let mut total = RowsAffected::default();
            for entity in values.iter_mut() {
                let affected =
                    insert_entity(db, &mut lease, &metadata, &mut **entity, None, timeout).await?;
                total.extend([affected]);
            }
            lease.release();
            Ok(total)
        })
        .await
    }
}

fn compile_insert<E: Entity>(
    writer: &dyn SqlWriter,
    metadata: &EntityMetadata,
    entity: &E,
    unless_exists: Option<&Expression>,
    timeout: Option<Duration>,
) -> Result<Query> {
    let columns: Vec<&ColumnDef> = metadata.insertable().collect();
    let returning: Vec<&ColumnDef> = metadata.generated().collect();
    let rows = [encode_row(entity, &columns)?];
    let mut context = Context::new(Fragment::SqlInsertInto);
    let mut sql = String::new();
    writer.write_insert(
        &mut context,
        &mut sql,
        &InsertStatement {
            metadata,
            columns: &columns,
            rows: &rows,
            returning: &returning,
            unless_exists,
        },
    )?;
    Ok(context.into_query(sql, timeout))
}

/// Insert one entity and its detail rows on `lease`. With `unless_exists` the
/// row is skipped when a row matching it is already present.
pub(crate) async fn insert_entity<D: Driver, E: Entity>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    entity: &mut E,
    unless_exists: Option<&Expression>,
    timeout: Option<Duration>,
) -> Result<RowsAffected> {
    let writer = db.driver().sql_writer();
    let query = compile_insert(writer.as_dyn(), metadata, &*entity, unless_exists, timeout)?;
    let returning: Vec<&ColumnDef> = metadata.generated().collect();
    let mut affected = RowsAffected::default();
    let mut returned = false;
    for result in db.run_on(lease, query).await? {
        match result {
            QueryResult::Row(row) if !returned => {
                write_back(entity, &returning, row)?;
                returned = true;
            }
            QueryResult::Affected(v) => affected.extend([v]),
            _ => {}
        }
    }
    if affected.rows_affected == 0 && !returned {
        return Ok(affected);
    }
    if let Some(token) = metadata.concurrency_token().filter(|c| c.is_engine_token()) {
        entity.set(token.ordinal, typed_integer(&token.value, 1))?;
    }
    insert_details(db, lease, metadata, &*entity, |_| true, timeout).await?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericSqlWriter, Result, Value, Variant, entity_fields};
    use indoc::indoc;

    #[derive(Default, Debug)]
    struct Order {
        id: i64,
        customer: String,
        version: i32,
        created: Option<String>,
    }

    impl Entity for Order {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            EntityMetadata::builder("Order", variant)
                .table("orders")
                .column(ColumnDef::new("id", Value::Int64(None)).key().auto_increment())
                .column(ColumnDef::new("customer", Value::Varchar(None)).size(50))
                .column(ColumnDef::new("version", Value::Int32(None)).concurrency_token())
                .column(ColumnDef::new("created", Value::Varchar(None)).generated().nullable())
                .build()
        }
        entity_fields!(id, customer, version, created);
    }

    #[test]
    fn outputs_generated_columns() {
        let mut order = Order {
            customer: "ACME".into(),
            ..Default::default()
        };
        let queries = Order::insert()
            .value(&mut order)
            .to_queries(&GenericSqlWriter)
            .expect("insert compiles");
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].sql,
            indoc! {"
                INSERT INTO [orders] ([customer], [version])
                OUTPUT INSERTED.[id], INSERTED.[created]
                VALUES (@p0, @p1);"
            }
        );
        assert_eq!(queries[0].parameters[0].size, Some(50));
        assert_eq!(queries[0].parameters[1].value, Value::Int32(Some(1)));
    }

    #[test]
    fn read_only_source() {
        #[derive(Default)]
        struct Report {
            total: i64,
        }
        impl Entity for Report {
            fn describe(variant: Variant) -> Result<EntityMetadata> {
                EntityMetadata::builder("Report", variant)
                    .sql("SELECT COUNT(*) AS total FROM orders", "report")
                    .column(ColumnDef::new("total", Value::Int64(None)))
                    .build()
            }
            entity_fields!(total);
        }
        let mut report = Report::default();
        let error = Report::insert()
            .value(&mut report)
            .to_queries(&GenericSqlWriter)
            .expect_err("custom sql is read only");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::ReadOnly { .. })
        ));
    }
}
