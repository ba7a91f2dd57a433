use crate::{
    CommandBuilder, CommandOptions, Database, Driver, Entity, EntityMetadata, Expression,
    Fragment, Lease, Projection, Result, SelectStatement, SqlWriter, UsageError, Value,
    command::{entity_columns, insert_entity, key_predicate, update_entity},
    error::raise,
    with_cancel,
    writer::Context,
};
use std::time::Duration;

/// Which statement a merge tries first.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrder {
    /// Update, insert when the row does not exist.
    #[default]
    UpdateThenInsert,
    /// Insert unless the key exists, update otherwise.
    InsertThenUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// The row exists but the update affected nothing, usually a stale concurrency token.
    Unchanged,
}

/// Insert or update one entity depending on whether its key exists.
pub struct Merge<'e, E: Entity> {
    options: CommandOptions,
    value: Option<&'e mut E>,
    order: MergeOrder,
    concurrency_check: bool,
}

impl<'e, E: Entity> Default for Merge<'e, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'e, E: Entity> CommandBuilder for Merge<'e, E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<'e, E: Entity> Merge<'e, E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            value: None,
            order: MergeOrder::default(),
            concurrency_check: true,
        }
    }

    pub fn value(mut self, entity: &'e mut E) -> Self {
        self.value = Some(entity);
        self
    }

    pub fn order(mut self, order: MergeOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_concurrency_check(mut self) -> Self {
        self.concurrency_check = true;
        self
    }

    pub fn without_concurrency_check(mut self) -> Self {
        self.concurrency_check = false;
        self
    }

    pub async fn execute<D: Driver>(self, db: &Database<D>) -> Result<MergeOutcome> {
        let Some(entity) = self.value else {
            return Err(raise(UsageError::MissingPayload("no entity to merge")));
        };
        let options = self.options;
        let metadata = E::metadata(options.variant)?;
        metadata.writable_table()?;
        metadata.require_key()?;
        let timeout = options.timeout_or(db.timeout());
        let check = self.concurrency_check;
        let order = self.order;
        with_cancel(options.cancel.as_ref(), async {
            let mut lease = db.acquire(options.close_connection).await?;
            let key: Vec<Value> = metadata.key_columns().map(|c| entity.get(c.ordinal)).collect();
            let key = key_predicate(&metadata, &key)?;
            let outcome = match order {
                MergeOrder::UpdateThenInsert => {
                    if try_update(db, &mut lease, &metadata, entity, check, &options, timeout)
                        .await?
                    {
                        MergeOutcome::Updated
                    } else if exists(db, &mut lease, &metadata, &key, timeout).await? {
                        MergeOutcome::Unchanged
                    } else {
                        insert_entity(db, &mut lease, &metadata, entity, None, timeout).await?;
                        MergeOutcome::Inserted
                    }
                }
                MergeOrder::InsertThenUpdate => {
                    let inserted =
                        insert_entity(db, &mut lease, &metadata, entity, Some(&key), timeout)
                            .await?;
                    if inserted.rows_affected > 0 {
                        MergeOutcome::Inserted
                    } else if try_update(db, &mut lease, &metadata, entity, check, &options, timeout)
                        .await?
                    {
                        MergeOutcome::Updated
                    } else {
                        MergeOutcome::Unchanged
                    }
                }
            };
            lease.release();
            log::debug!("Merge of `{}`: {:?}", metadata.entity, outcome);
            Ok(outcome)
        })
        .await
    }
}

/// Update the entity, `false` when no row was affected.
async fn try_update<D: Driver, E: Entity>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    entity: &mut E,
    check: bool,
    options: &CommandOptions,
    timeout: Option<Duration>,
) -> Result<bool> {
    let ordinals = entity_columns(metadata, options.partial);
    let engine_token = metadata
        .concurrency_token()
        .is_some_and(|c| c.is_engine_token());
    if ordinals.is_empty() && !engine_token {
        return Ok(false);
    }
    let affected =
        update_entity(db, lease, metadata, entity, &ordinals, check, options, timeout).await?;
    Ok(affected.rows_affected > 0)
}

async fn exists<D: Driver>(
    db: &Database<D>,
    lease: &mut Lease<D>,
    metadata: &EntityMetadata,
    key: &Expression,
    timeout: Option<Duration>,
) -> Result<bool> {
    let writer = db.driver().sql_writer();
    let mut context = Context::new(Fragment::SqlSelect);
    let mut sql = String::new();
    writer.write_select(
        &mut context,
        &mut sql,
        &SelectStatement {
            filter: Some(key),
            ..SelectStatement::new(metadata, Projection::Exists)
        },
    )?;
    let rows = db.fetch_on(lease, context.into_query(sql, timeout)).await?;
    Ok(!rows.is_empty())
}
