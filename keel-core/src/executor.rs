use crate::{
    BulkOptions, ColumnDef, Driver, EntityMetadata, Fragment, InsertStatement, Query,
    QueryResult, Result, RowLabeled, RowsAffected, SqlWriter, Value,
    stream::{Stream, StreamExt, TryStreamExt},
    writer::Context,
};
use std::{future::Future, pin::pin, sync::Arc, time::Duration};

/// Destination and tuning of a bulk copy.
#[derive(Debug, Clone)]
pub struct BulkCopy {
    pub metadata: Arc<EntityMetadata>,
    /// Ordinals of the copied columns, each row carries one value per ordinal.
    pub columns: Vec<usize>,
    pub batch_size: usize,
    /// Report progress every this many rows, `0` disables it.
    pub notify_after: u64,
    pub options: BulkOptions,
    pub timeout: Option<Duration>,
}

pub trait Executor: Send + Sized {
    type Driver: Driver;

    fn driver(&self) -> &Self::Driver;

    /// General method to send any query and return any result type (rows, counts or outputs).
    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send;

    /// Execute the query and returns the rows.
    fn fetch(&mut self, query: Query) -> impl Stream<Item = Result<RowLabeled>> + Send {
        self.run(query).filter_map(|v| async move {
            match v {
                Ok(QueryResult::Row(v)) => Some(Ok(v)),
                Err(e) => Some(Err(e)),
                _ => None,
            }
        })
    }

    /// Execute the query and return the total number of rows affected.
    fn execute(&mut self, query: Query) -> impl Future<Output = Result<RowsAffected>> + Send {
        self.run(query)
            .filter_map(|v| async move {
                match v {
                    Ok(QueryResult::Affected(v)) => Some(Ok(v)),
                    Err(e) => Some(Err(e)),
                    _ => None,
                }
            })
            .try_collect()
    }

    /// First column of the first row, `None` when no row comes back.
    fn scalar(&mut self, query: Query) -> impl Future<Output = Result<Option<Value>>> + Send {
        async move {
            let mut rows = pin!(self.fetch(query));
            Ok(rows
                .try_next()
                .await?
                .and_then(|row| row.values.into_vec().into_iter().next()))
        }
    }

    /// Copy rows into a table, returns the number of rows copied. Defaults to
    /// [`insert_batches`] for drivers without a native facility.
    fn bulk_copy<S>(
        &mut self,
        copy: BulkCopy,
        rows: S,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> impl Future<Output = Result<u64>> + Send
    where
        S: Stream<Item = Result<Vec<Value>>> + Send,
    {
        insert_batches(self, copy, rows, progress)
    }
}

/// Copy `rows` with multi row parameterized inserts of `copy.batch_size` rows,
/// calling `progress` with the running total every `copy.notify_after` rows.
pub async fn insert_batches<X, S>(
    executor: &mut X,
    copy: BulkCopy,
    rows: S,
    progress: &mut (dyn FnMut(u64) + Send),
) -> Result<u64>
where
    X: Executor,
    S: Stream<Item = Result<Vec<Value>>> + Send,
{
    let writer = executor.driver().sql_writer();
    let metadata = copy.metadata.clone();
    let columns: Vec<&ColumnDef> = copy.columns.iter().map(|i| &metadata.columns[*i]).collect();
    let batch_size = copy.batch_size.max(1);
    let mut rows = pin!(rows);
    let mut pending = Vec::with_capacity(batch_size);
    let mut total = 0u64;
    loop {
        let row = rows.try_next().await?;
        let done = row.is_none();
        pending.extend(row);
        if pending.len() >= batch_size || (done && !pending.is_empty()) {
            let mut context = Context::new(Fragment::SqlInsertInto);
            let mut sql = String::new();
            writer.write_insert(
                &mut context,
                &mut sql,
                &InsertStatement {
                    metadata: &metadata,
                    columns: &columns,
                    rows: &pending,
                    returning: &[],
                    unless_exists: None,
                },
            )?;
            executor.execute(context.into_query(sql, copy.timeout)).await?;
            let before = total;
            total += pending.len() as u64;
            pending.clear();
            if copy.notify_after > 0 && total / copy.notify_after > before / copy.notify_after {
                progress(total);
            }
        }
        if done {
            break;
        }
    }
    Ok(total)
}
