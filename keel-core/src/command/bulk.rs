use crate::{
    BulkCopy, Cancelled, ColumnDef, CommandBuilder, CommandOptions, Database, Driver, Entity,
    Executor, Result, Value,
    command::encode_row,
    error::raise,
    stream::{self, Stream, StreamExt},
};
use std::{fmt::Debug, pin::pin};
use tokio::sync::mpsc;

/// Server side behavior of a bulk copy, honored by drivers with a native facility.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    /// Copy auto increment values from the source instead of generating them.
    pub keep_identity: bool,
    pub check_constraints: bool,
    pub fire_triggers: bool,
    pub table_lock: bool,
}

const DEFAULT_BATCH_SIZE: usize = 1000;

type Progress = Box<dyn FnMut(u64) + Send>;

/// Load many entities into the table of `E`.
///
/// Every source is funneled into a stream consumed by
/// [`Executor::bulk_copy`], detail tables are not copied.
pub struct BulkLoad<E: Entity> {
    options: CommandOptions,
    batch_size: usize,
    notify_after: u64,
    progress: Option<Progress>,
    bulk: BulkOptions,
    _entity: std::marker::PhantomData<fn(E)>,
}

impl<E: Entity> Debug for BulkLoad<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoad")
            .field("batch_size", &self.batch_size)
            .field("notify_after", &self.notify_after)
            .field("options", &self.bulk)
            .finish()
    }
}

impl<E: Entity> Default for BulkLoad<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> CommandBuilder for BulkLoad<E> {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl<E: Entity> BulkLoad<E> {
    pub fn new() -> Self {
        Self {
            options: Default::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            notify_after: 0,
            progress: None,
            bulk: BulkOptions::default(),
            _entity: Default::default(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Call `callback` with the running total every `rows` copied rows.
    pub fn notify_after(mut self, rows: u64, callback: impl FnMut(u64) + Send + 'static) -> Self {
        self.notify_after = rows;
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn options(mut self, options: BulkOptions) -> Self {
        self.bulk = options;
        self
    }

    pub async fn load<D: Driver>(
        self,
        db: &Database<D>,
        entities: impl IntoIterator<Item = E, IntoIter: Send>,
    ) -> Result<u64> {
        self.load_stream(db, stream::iter(entities)).await
    }

    pub async fn load_channel<D: Driver>(
        self,
        db: &Database<D>,
        receiver: mpsc::Receiver<E>,
    ) -> Result<u64> {
        let entities = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|e| (e, receiver))
        });
        self.load_stream(db, entities).await
    }

    /// Copy every entity produced by `entities`, returns the number of rows copied.
    pub async fn load_stream<D: Driver>(
        mut self,
        db: &Database<D>,
        entities: impl Stream<Item = E> + Send,
    ) -> Result<u64> {
        let metadata = E::metadata(self.options.variant)?;
        metadata.writable_table()?;
        let keep_identity = self.bulk.keep_identity;
        let columns: Vec<&ColumnDef> = metadata
            .columns
            .iter()
            .filter(|c| !c.is_detail() && (c.insert || (keep_identity && c.auto_increment)))
            .collect();
        let copy = BulkCopy {
            metadata: metadata.clone(),
            columns: columns.iter().map(|c| c.ordinal).collect(),
            batch_size: self.batch_size,
            notify_after: self.notify_after,
            options: self.bulk,
            timeout: self.options.timeout_or(db.timeout()),
        };
        let cancel = self.options.cancel.clone();
        let mut entities = pin!(entities);
        let rows = async_stream::try_stream! {
            loop {
                let entity = match &cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(raise(Cancelled)),
                        entity = entities.next() => Ok(entity),
                    },
                    None => Ok(entities.next().await),
                };
                let Some(entity) = entity? else {
                    break;
                };
                let row: Vec<Value> = encode_row(&entity, &columns)?;
                yield row;
            }
        };
        let mut progress = self.progress.take().unwrap_or_else(|| Box::new(|_: u64| {}));
        let mut lease = db.acquire(self.options.close_connection).await?;
        log::debug!(
            "Bulk copy into `{}`, {} columns, batches of {}",
            metadata.entity,
            copy.columns.len(),
            copy.batch_size
        );
        let total = lease
            .bulk_copy(copy, rows, &mut *progress)
            .await
            .map_err(|e| db.translate(e))?;
        lease.release();
        Ok(total)
    }
}
