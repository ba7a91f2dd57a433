use crate::{
    AsValue, CommandBuilder, CommandOptions, Database, DeleteStatement, Driver, Entity,
    EntityMetadata, Fragment, Query, Result, RowsAffected, SqlWriter, UsageError, Value,
    command::{delete_details, key_predicate},
    error::raise,
    with_cancel,
    writer::Context,
};
use std::marker::PhantomData;

/// Delete rows by key, by filters or, explicitly, every row.
pub struct Delete<E: Entity> {
    options: CommandOptions,
    key: Option<Vec<Value>>,
    all_rows: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Delete<E> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            key: self.key.clone(),
            all_rows: self.all_rows,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for Delete<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> CommandBuilder for Delete<E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<E: Entity> Delete<E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            key: None,
            all_rows: false,
            _entity: PhantomData,
        }
    }

    /// Delete the row of `entity`, identified by its key.
    pub fn entity(self, entity: &E) -> Result<Self> {
        let metadata = E::metadata(self.options.variant)?;
        metadata.require_key()?;
        let key = metadata.key_columns().map(|c| entity.get(c.ordinal)).collect();
        Ok(self.key_values(key))
    }

    pub fn key(self, value: impl AsValue) -> Self {
        self.key_values(vec![value.as_value()])
    }

    pub fn key_values(mut self, values: Vec<Value>) -> Self {
        self.key = Some(values);
        self
    }

    /// Allow a delete without key nor filter.
    pub fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    pub fn to_query(&self, writer: &dyn SqlWriter) -> Result<Query> {
        let metadata = E::metadata(self.options.variant)?;
        self.compile(writer, &metadata)
    }

    fn compile(&self, writer: &dyn SqlWriter, metadata: &EntityMetadata) -> Result<Query> {
        let key = self
            .key
            .as_deref()
            .map(|v| key_predicate(metadata, v))
            .transpose()?;
        let filter = self.options.predicate(key)?;
        if filter.is_none() && !self.all_rows {
            return Err(raise(UsageError::MissingPayload(
                "delete without key, filter or all rows",
            )));
        }
        let mut context = Context::new(Fragment::SqlDeleteFrom);
        let mut sql = String::new();
        writer.write_delete(
            &mut context,
            &mut sql,
            &DeleteStatement {
                metadata,
                filter: filter.as_ref(),
                hints: self.options.hints.as_ref(),
            },
        )?;
        Ok(context.into_query(sql, self.options.timeout))
    }

    pub async fn execute<D: Driver>(self, db: &Database<D>) -> Result<RowsAffected> {
        let metadata = E::metadata(self.options.variant)?;
        let writer = db.driver().sql_writer();
        let mut query = self.compile(writer.as_dyn(), &metadata)?;
        let timeout = self.options.timeout_or(db.timeout());
        query.timeout = timeout;
        with_cancel(self.options.cancel.as_ref(), async {
            let mut lease = db.acquire(self.options.close_connection).await?;
            if self.key.is_none() && !metadata.details.is_empty() {
                log::warn!(
                    "Delete of `{}` by filter leaves its detail rows in place",
                    metadata.entity
                );
            }
            let affected = db.execute_on(&mut lease, query).await?;
            // Filters may spare the keyed parent, its details follow the parent
            if let Some(key) = self.key.as_ref().filter(|_| affected.rows_affected > 0) {
                delete_details(db, &mut lease, &metadata, key, |_| true, timeout).await?;
            }
            lease.release();
            Ok(affected)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, GenericSqlWriter, LockHint, TableHints, Variant, col, entity_fields};

    #[derive(Default)]
    struct Line {
        order: i64,
        number: i32,
        sku: String,
    }

    impl Entity for Line {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            EntityMetadata::builder("Line", variant)
                .table("lines")
                .column(ColumnDef::new("order", Value::Int64(None)).key().name("order_id"))
                .column(ColumnDef::new("number", Value::Int32(None)).key())
                .column(ColumnDef::new("sku", Value::Varchar(None)))
                .build()
        }
        entity_fields!(order, number, sku);
    }

    #[test]
    fn composite_key() {
        let line = Line {
            order: 10,
            number: 2,
            sku: "X1".into(),
        };
        let query = Line::delete()
            .entity(&line)
            .expect("keyed")
            .to_query(&GenericSqlWriter)
            .expect("delete compiles");
        assert_eq!(
            query.sql,
            "DELETE FROM [lines]\nWHERE (([order_id] = @p0) AND ([number] = @p1));"
        );
        assert_eq!(query.parameters[0].value, Value::Int64(Some(10)));
    }

    #[test]
    fn needs_a_target() {
        let error = Line::delete()
            .to_query(&GenericSqlWriter)
            .expect_err("nothing selects the rows");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::MissingPayload(..))
        ));
        let query = Line::delete()
            .all_rows()
            .hints(TableHints {
                lock: Some(LockHint::TabLock),
                ..Default::default()
            })
            .to_query(&GenericSqlWriter)
            .expect("explicit all rows");
        assert_eq!(query.sql, "DELETE FROM [lines] WITH (TABLOCK);");
        let query = Line::delete()
            .filter(col("sku").ne("X1"))
            .to_query(&GenericSqlWriter)
            .expect("filtered");
        assert_eq!(query.sql, "DELETE FROM [lines]\nWHERE ([sku] <> @p0);");
    }
}
