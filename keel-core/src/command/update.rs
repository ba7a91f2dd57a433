use crate::{
    AsValue, ColumnDef, CommandBuilder, CommandOptions, Database, Driver, Entity, EntityMetadata,
    Expression, Fragment, Lease, Query, QueryResult, Result, RowsAffected, SqlWriter, Tracked,
    UpdateStatement, UsageError, Value, and_all, col,
    command::{delete_details, insert_details, key_predicate, typed_integer, write_back},
    error::raise,
    with_cancel,
    writer::Context,
};
use std::{borrow::Cow, time::Duration};

enum Target<'e, E: Entity> {
    None,
    Entity(&'e mut E),
    Tracked(&'e mut Tracked<E>),
}

/// Update rows.
///
/// Three forms: a whole entity (every updatable column loaded under the
/// partial mask), a tracked entity (only the changed columns) or targeted
/// assignments applied to the rows matching a key or filters.
pub struct Update<'e, E: Entity> {
    options: CommandOptions,
    target: Target<'e, E>,
    assignments: Vec<(Cow<'static, str>, Expression)>,
    key: Option<Vec<Value>>,
    concurrency_check: bool,
}

impl<'e, E: Entity> Default for Update<'e, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'e, E: Entity> CommandBuilder for Update<'e, E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<'e, E: Entity> Update<'e, E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            target: Target::None,
            assignments: Vec::new(),
            key: None,
            concurrency_check: true,
        }
    }

    pub fn entity(mut self, entity: &'e mut E) -> Self {
        self.target = Target::Entity(entity);
        self
    }

    pub fn tracked(mut self, tracked: &'e mut Tracked<E>) -> Self {
        self.target = Target::Tracked(tracked);
        self
    }

    /// Assign a constant to `field`.
    pub fn set(self, field: impl Into<Cow<'static, str>>, value: impl AsValue) -> Result<Self> {
        self.set_expr(field, Expression::Constant(value.as_value()))
    }

    /// Assign an expression over the current row to `field`.
    ///
    /// The field is checked against the current variant here and again,
    /// against the final variant, when the statement compiles.
    pub fn set_expr(
        mut self,
        field: impl Into<Cow<'static, str>>,
        value: Expression,
    ) -> Result<Self> {
        let field = field.into();
        let metadata = E::metadata(self.options.variant)?;
        assignable(&metadata, &field)?;
        self.assignments.push((field, value));
        Ok(self)
    }

    pub fn key(self, value: impl AsValue) -> Self {
        self.key_values(vec![value.as_value()])
    }

    pub fn key_values(mut self, values: Vec<Value>) -> Self {
        self.key = Some(values);
        self
    }

    /// Match the concurrency token too, a stale entity then affects no row.
    pub fn with_concurrency_check(mut self) -> Self {
        self.concurrency_check = true;
        self
    }

    pub fn without_concurrency_check(mut self) -> Self {
        self.concurrency_check = false;
        self
    }

    /// Compile the statement, no I/O. A tracked entity without changes compiles to `None`.
    pub fn to_query(&self, writer: &dyn SqlWriter) -> Result<Option<Query>> {
        let metadata = E::metadata(self.options.variant)?;
        let check = self.concurrency_check;
        match &self.target {
            Target::None => self.compile_targeted(writer, &metadata).map(Some),
            Target::Entity(entity) => {
                let ordinals = entity_columns(&metadata, self.options.partial);
                let (query, _) =
                    compile_entity(writer, &metadata, &**entity, &ordinals, check, &self.options)?;
                Ok(Some(query))
            }
            Target::Tracked(tracked) => {
                let ordinals = tracked_columns(&metadata, tracked)?;
                if ordinals.is_empty() {
                    return Ok(None);
                }
                let (query, _) =
                    compile_entity(writer, &metadata, &***tracked, &ordinals, check, &self.options)?;
                Ok(Some(query))
            }
        }
    }

    fn compile_targeted(&self, writer: &dyn SqlWriter, metadata: &EntityMetadata) -> Result<Query> {
        if self.assignments.is_empty() {
            return Err(raise(UsageError::MissingPayload(
                "update without entity or assignments",
            )));
        }
        let key = self
            .key
            .as_deref()
            .map(|v| key_predicate(metadata, v))
            .transpose()?;
        let Some(filter) = self.options.predicate(key)? else {
            return Err(raise(UsageError::MissingPayload(
                "targeted update without key or filter",
            )));
        };
        let assignments = self
            .assignments
            .iter()
            .map(|(field, value)| Ok((assignable(metadata, field)?, value.clone())))
            .collect::<Result<Vec<_>>>()?;
        let mut context = Context::new(Fragment::SqlUpdate);
        let mut sql = String::new();
        writer.write_update(
            &mut context,
            &mut sql,
            &UpdateStatement {
                metadata,
                assignments: &assignments,
                filter: Some(&filter),
                returning: &[],
                hints: self.options.hints.as_ref(),
            },
        )?;
        Ok(context.into_query(sql, self.options.timeout))
    }

    pub async fn execute<D: Driver>(mut self, db: &Database<D>) -> Result<RowsAffected> {
        let metadata = E::metadata(self.options.variant)?;
        let timeout = self.options.timeout_or(db.timeout());
        let check = self.concurrency_check;
        let target = std::mem::replace(&mut self.target, Target::None);
        let options = &self.options;
        match target {
            Target::None => {
                let writer = db.driver().sql_writer();
                let mut query = self.compile_targeted(writer.as_dyn(), &metadata)?;
                query.timeout = timeout;
                with_cancel(options.cancel.as_ref(), async {
                    let mut lease = db.acquire(options.close_connection).await?;
                    let affected = db.execute_on(&mut lease, query).await?;
                    lease.release();
                    Ok(affected)
                })
                .await
            }
            Target::Entity(entity) => {
                let ordinals = entity_columns(&metadata, options.partial);
                with_cancel(options.cancel.as_ref(), async {
                    let mut lease = db.acquire(options.close_connection).await?;
                    let affected = update_entity(
                        db, &mut lease, &metadata, entity, &ordinals, check, options, timeout,
                    )
                    .await?;
                    lease.release();
                    Ok(affected)
                })
                .await
            }
            Target::Tracked(tracked) => {
                let ordinals = tracked_columns(&metadata, tracked)?;
                if ordinals.is_empty() {
                    log::debug!("`{}` has no changes, nothing to update", metadata.entity);
                    return Ok(RowsAffected::default());
                }
                with_cancel(options.cancel.as_ref(), async {
                    let mut lease = db.acquire(options.close_connection).await?;
                    let affected = update_entity(
                        db,
                        &mut lease,
                        &metadata,
                        tracked.entity_mut(),
                        &ordinals,
                        check,
                        options,
                        timeout,
                    )
                    .await?;
                    lease.release();
                    if affected.rows_affected > 0 {
                        tracked.accept_changes();
                    }
                    Ok(affected)
                })
                .await
            }
        }
    }
}

/// Updatable columns of a whole entity, loaded under `mask`.
pub(crate) fn entity_columns(metadata: &EntityMetadata, mask: u64) -> Vec<usize> {
    metadata
        .columns
        .iter()
        .filter(|c| {
            c.update && !c.key && !c.concurrency_token && !c.is_detail() && c.is_loaded(mask)
        })
        .map(|c| c.ordinal)
        .collect()
}

fn tracked_columns<E: Entity>(metadata: &EntityMetadata, tracked: &Tracked<E>) -> Result<Vec<usize>> {
    let mut ordinals = Vec::with_capacity(tracked.changed_ordinals().len());
    for ordinal in tracked.changed_ordinals() {
        let column = &metadata.columns[*ordinal];
        if !column.update || column.key || column.concurrency_token {
            return Err(raise(UsageError::NotUpdatable {
                entity: metadata.entity.clone(),
                field: column.field.to_string(),
            }));
        }
        ordinals.push(*ordinal);
    }
    Ok(ordinals)
}

/// Statement updating `ordinals` of the row identified by the key of `entity`.
/// Returns the columns echoed back.
fn compile_entity<'m, E: Entity>(
    writer: &dyn SqlWriter,
    metadata: &'m EntityMetadata,
    entity: &E,
    ordinals: &[usize],
    check: bool,
    options: &CommandOptions,
) -> Result<(Query, Vec<&'m ColumnDef>)> {
    let key: Vec<Value> = metadata.key_columns().map(|c| entity.get(c.ordinal)).collect();
    let mut filter = vec![key_predicate(metadata, &key)?];
    let mut assignments = Vec::with_capacity(ordinals.len() + 1);
    for ordinal in ordinals {
        let column = &metadata.columns[*ordinal];
        let value = column.encode(entity.get(column.ordinal))?;
        assignments.push((column, Expression::Constant(value)));
    }
    let mut returning: Vec<&ColumnDef> = Vec::new();
    if let Some(token) = metadata.concurrency_token() {
        if token.is_engine_token() {
            assignments.push((
                token,
                col(token.field.clone()).add(typed_integer(&token.value, 1)),
            ));
            returning.push(token);
        }
        if check {
            filter.push(col(token.field.clone()).eq(entity.get(token.ordinal)));
        }
    }
    returning.extend(metadata.generated().filter(|c| !c.key && !c.is_engine_token()));
    let filter = options.predicate(and_all(filter))?;
    let mut context = Context::new(Fragment::SqlUpdate);
    let mut sql = String::new();
    writer.write_update(
        &mut context,
        &mut sql,
        &UpdateStatement {
            metadata,
            assignments: &assignments,
            filter: filter.as_ref(),
            returning: &returning,
            hints: options.hints.as_ref(),
        },
    )?;
    Ok((context.into_query(sql, options.timeout), returning))
}

/// Update one entity on `lease`, write back the echoed columns and replace its
/// detail tables loaded under the partial mask.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn update_entity<D: Driver, E: Entity>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    entity: &mut E,
    ordinals: &[usize],
    check: bool,
    options: &CommandOptions,
    timeout: Option<Duration>,
) -> Result<RowsAffected> {
    let writer = db.driver().sql_writer();
    let (mut query, returning) =
        compile_entity(writer.as_dyn(), metadata, &*entity, ordinals, check, options)?;
    query.timeout = timeout;
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
        log::debug!(
            "Update of `{}` affected no row, the key is missing or the token is stale",
            metadata.entity
        );
        return Ok(affected);
    }
    let mask = options.partial;
    let loaded = |d: &crate::DetailTable| metadata.columns[d.ordinal].is_loaded(mask);
    if metadata.details.iter().any(loaded) {
        let key: Vec<Value> = metadata.key_columns().map(|c| entity.get(c.ordinal)).collect();
        delete_details(db, lease, metadata, &key, loaded, timeout).await?;
        insert_details(db, lease, metadata, &*entity, loaded, timeout).await?;
    }
    Ok(affected)
}

fn assignable<'m>(metadata: &'m EntityMetadata, field: &str) -> Result<&'m ColumnDef> {
    let column = metadata.column_or_err(field)?;
    if column.is_detail() {
        return Err(raise(UsageError::DetailColumn {
            entity: metadata.entity.clone(),
            field: field.into(),
            usage: "assignments",
        }));
    }
    if !column.update || column.key {
        return Err(raise(UsageError::NotUpdatable {
            entity: metadata.entity.clone(),
            field: field.into(),
        }));
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericSqlWriter, Variant, entity_fields};
    use indoc::indoc;

    #[derive(Default, Debug, Clone)]
    struct Account {
        id: i64,
        owner: String,
        balance: i64,
        version: i32,
    }

    impl Entity for Account {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            // Variant `1` is the archive, where balances are frozen
            let balance = ColumnDef::new("balance", Value::Int64(None));
            let (table, balance) = match variant {
                1 => ("accounts_archive", balance.no_update()),
                _ => ("accounts", balance),
            };
            EntityMetadata::builder("Account", variant)
                .table(table)
                .column(ColumnDef::new("id", Value::Int64(None)).key())
                .column(ColumnDef::new("owner", Value::Varchar(None)).size(80))
                .column(balance)
                .column(ColumnDef::new("version", Value::Int32(None)).concurrency_token())
                .build()
        }
        entity_fields!(id, owner, balance, version);
    }

    fn account() -> Account {
        Account {
            id: 3,
            owner: "Ada".into(),
            balance: 100,
            version: 4,
        }
    }

    #[test]
    fn entity_with_token() {
        let mut account = account();
        let query = Account::update()
            .entity(&mut account)
            .to_query(&GenericSqlWriter)
            .expect("update compiles")
            .expect("statement");
        assert_eq!(
            query.sql,
            indoc! {"
                UPDATE [accounts]
                SET [owner] = @p0, [balance] = @p1, [version] = ([version] + @p2)
                OUTPUT INSERTED.[version]
                WHERE (([id] = @p3) AND ([version] = @p4));"
            }
        );
        assert_eq!(query.parameters[2].value, Value::Int32(Some(1)));
        assert_eq!(query.parameters[4].value, Value::Int32(Some(4)));
    }

    #[test]
    fn without_check() {
        let mut account = account();
        let query = Account::update()
            .entity(&mut account)
            .without_concurrency_check()
            .to_query(&GenericSqlWriter)
            .expect("update compiles")
            .expect("statement");
        assert!(query.sql.ends_with("WHERE ([id] = @p3);"));
    }

    #[test]
    fn tracked_changes_only() {
        let mut tracked = Tracked::new(account()).expect("tracked");
        let unchanged = Account::update()
            .tracked(&mut tracked)
            .to_query(&GenericSqlWriter)
            .expect("update compiles");
        assert!(unchanged.is_none());
        tracked.set_field("balance", 90i64).expect("balance");
        let query = Account::update()
            .tracked(&mut tracked)
            .to_query(&GenericSqlWriter)
            .expect("update compiles")
            .expect("statement");
        assert!(query.sql.starts_with(indoc! {"
            UPDATE [accounts]
            SET [balance] = @p0, [version] = ([version] + @p1)"
        }));
    }

    #[test]
    fn targeted() {
        let query = Account::update()
            .set_expr("balance", col("balance").sub(10))
            .expect("balance")
            .filter(col("owner").eq("Ada"))
            .to_query(&GenericSqlWriter)
            .expect("update compiles")
            .expect("statement");
        assert_eq!(
            query.sql,
            indoc! {"
                UPDATE [accounts]
                SET [balance] = ([balance] - @p0)
                WHERE ([owner] = @p1);"
            }
        );
        let error = Account::update()
            .set("balance", 0i64)
            .expect("balance")
            .to_query(&GenericSqlWriter)
            .expect_err("no key nor filter");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::MissingPayload(..))
        ));
    }

    #[test]
    fn assignment_errors_are_immediate() {
        assert!(matches!(
            Account::update()
                .set("id", 1i64)
                .err()
                .and_then(|e| e.downcast::<UsageError>().ok()),
            Some(UsageError::NotUpdatable { .. })
        ));
        assert!(matches!(
            Account::update()
                .set("nickname", "x")
                .err()
                .and_then(|e| e.downcast::<UsageError>().ok()),
            Some(UsageError::UnknownField { .. })
        ));
    }

    #[test]
    fn assignments_follow_the_final_variant() {
        let query = Account::update()
            .set("owner", "Grace")
            .expect("owner")
            .variant(1)
            .key(3i64)
            .to_query(&GenericSqlWriter)
            .expect("update compiles")
            .expect("statement");
        assert_eq!(
            query.sql,
            indoc! {"
                UPDATE [accounts_archive]
                SET [owner] = @p0
                WHERE ([id] = @p1);"
            }
        );
        let error = Account::update()
            .set("balance", 0i64)
            .expect("balance is updatable in the default variant")
            .variant(1)
            .key(3i64)
            .to_query(&GenericSqlWriter)
            .expect_err("balance is frozen in the archive");
        assert!(matches!(
            error.downcast_ref::<UsageError>(),
            Some(UsageError::NotUpdatable { .. })
        ));
        assert!(
            Account::update()
                .variant(1)
                .set("balance", 0i64)
                .is_err()
        );
    }
}
