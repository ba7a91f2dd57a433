use crate::{
    AmbientSlot, AmbientTransaction, Connection, Driver, EntityMetadata, Error, Executor, Query,
    Result, RowLabeled, RowsAffected, SlotConnection, SqlWriter, TransactionError,
    TransactionScope, UsageError, Value,
    error::raise,
    stream::TryStreamExt,
};
use std::{
    borrow::Cow,
    fmt::{self, Debug, Formatter},
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{OwnedMappedMutexGuard, OwnedMutexGuard};

static DATABASE_ID: AtomicU64 = AtomicU64::new(1);

/// Translates provider errors, `None` lets the original error through.
pub type ErrorHook = Box<dyn Fn(&Error) -> Option<Error> + Send + Sync>;

const DEFAULT_MAX_IDLE: usize = 4;

pub struct DatabaseBuilder<D: Driver> {
    url: Cow<'static, str>,
    timeout: Option<Duration>,
    max_idle: Option<usize>,
    error_hook: Option<ErrorHook>,
    driver: D,
}

impl<D: Driver> DatabaseBuilder<D> {
    /// Default timeout of every command, overrides the `timeout` URL option.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Idle connections kept for reuse, overrides the `max_idle` URL option.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    pub fn with_error_hook(
        mut self,
        hook: impl Fn(&Error) -> Option<Error> + Send + Sync + 'static,
    ) -> Self {
        self.error_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<Database<D>> {
        let prefix = format!("{}://", D::NAME);
        if !self.url.starts_with(&prefix) {
            return Err(Error::msg(format!(
                "Expected {} connection url to start with `{}`",
                D::NAME,
                prefix
            )));
        }
        let (base, query) = match self.url.split_once('?') {
            Some((base, query)) => (base, query),
            None => (self.url.as_ref(), ""),
        };
        let mut timeout = None;
        let mut max_idle = DEFAULT_MAX_IDLE;
        let mut forwarded = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let context = || format!("While decoding the `{}` option of `{}`", key, self.url);
            match key.as_ref() {
                "timeout" => {
                    let seconds = value.parse::<f64>().map_err(|e| {
                        let error = Error::new(e).context(context());
                        log::error!("{:#}", error);
                        error
                    })?;
                    if !seconds.is_finite() || seconds < 0.0 {
                        let error = Error::msg(format!("Invalid timeout `{}`", value))
                            .context(context());
                        log::error!("{:#}", error);
                        return Err(error);
                    }
                    timeout = Some(Duration::from_secs_f64(seconds));
                }
                "max_idle" => {
                    max_idle = value.parse::<usize>().map_err(|e| {
                        let error = Error::new(e).context(context());
                        log::error!("{:#}", error);
                        error
                    })?;
                }
                _ => forwarded.push(format!(
                    "{}={}",
                    urlencoding::encode(&key),
                    urlencoding::encode(&value)
                )),
            }
        }
        let url = if forwarded.is_empty() {
            base.to_string()
        } else {
            format!("{}?{}", base, forwarded.join("&"))
        };
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                id: DATABASE_ID.fetch_add(1, Ordering::Relaxed),
                driver: self.driver,
                url,
                timeout: self.timeout.or(timeout),
                max_idle: self.max_idle.unwrap_or(max_idle),
                idle: Default::default(),
                error_hook: self.error_hook,
            }),
        })
    }
}

struct DatabaseInner<D: Driver> {
    id: u64,
    driver: D,
    url: String,
    timeout: Option<Duration>,
    max_idle: usize,
    idle: Mutex<Vec<D::Connection>>,
    error_hook: Option<ErrorHook>,
}

/// Source of connections for commands, cheap to clone.
///
/// Inside a [`TransactionScope`] every command runs on the connection of the
/// current ambient. Outside, a connection is taken from the idle list or
/// opened, and closed afterwards unless the command asked to keep it.
pub struct Database<D: Driver> {
    inner: Arc<DatabaseInner<D>>,
}

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> Debug for Database<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("driver", &D::NAME)
            .field("url", &self.inner.url)
            .field("timeout", &self.inner.timeout)
            .field("max_idle", &self.inner.max_idle)
            .finish()
    }
}

impl<D: Driver> Database<D> {
    pub fn builder(url: impl Into<Cow<'static, str>>) -> DatabaseBuilder<D> {
        DatabaseBuilder {
            url: url.into(),
            timeout: None,
            max_idle: None,
            error_hook: None,
            driver: D::default(),
        }
    }

    pub fn new(url: impl Into<Cow<'static, str>>) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Connection URL forwarded to the driver, without the options consumed here.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn idle_connections(&self) -> usize {
        self.idle().len()
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<D::Connection>> {
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pass a provider error through the error hook.
    pub fn translate(&self, error: Error) -> Error {
        match &self.inner.error_hook {
            Some(hook) => hook(&error).unwrap_or(error),
            None => error,
        }
    }

    async fn open(&self) -> Result<D::Connection> {
        log::trace!("Opening a {} connection", D::NAME);
        D::Connection::connect(&self.inner.url)
            .await
            .map_err(|e| self.translate(e))
    }

    /// Connection for one command: the ambient one when a scope is current.
    /// `close` drops a non ambient connection once released instead of keeping it idle.
    pub async fn acquire(&self, close: bool) -> Result<Lease<D>> {
        if let Some(scope) = TransactionScope::current() {
            let ambient = scope.ambient().clone();
            ambient.check_active()?;
            if ambient.streaming.load(Ordering::Acquire) {
                return Err(raise(UsageError::StreamOpen));
            }
            let mut slot = ambient.slot.clone().lock_owned().await;
            match slot.as_ref() {
                Some(existing) if existing.database_id() != self.id() => {
                    return Err(raise(TransactionError::DatabaseMismatch));
                }
                Some(..) => {}
                None => {
                    let connection = self.open().await?;
                    *slot = Some(Box::new(AmbientSlot {
                        database_id: self.id(),
                        connection: SlotConnection::Owned(connection),
                        owns_transaction: ambient.options.transactional,
                        isolation: ambient.options.isolation,
                        begun: false,
                    }));
                }
            }
            if let Some(connection) = slot.as_mut() {
                connection.begin().await.map_err(|e| self.translate(e))?;
            }
            let guard = OwnedMutexGuard::try_map(slot, |slot| {
                slot.as_mut()?
                    .connection_any()
                    .downcast_mut::<D::Connection>()
            })
            .map_err(|_| raise(TransactionError::DatabaseMismatch))?;
            return Ok(Lease {
                kind: LeaseKind::Ambient { guard, ambient },
            });
        }
        let idle = self.idle().pop();
        let connection = match idle {
            Some(connection) => connection,
            None => self.open().await?,
        };
        Ok(Lease {
            kind: LeaseKind::Pooled {
                connection,
                database: self.clone(),
                keep: !close,
            },
        })
    }

    /// Run a statement on a leased connection, logging it and translating failures.
    pub async fn execute_on(&self, lease: &mut Lease<D>, query: Query) -> Result<RowsAffected> {
        log::debug!("{}", query);
        lease.execute(query).await.map_err(|e| self.translate(e))
    }

    pub async fn fetch_on(&self, lease: &mut Lease<D>, query: Query) -> Result<Vec<RowLabeled>> {
        log::debug!("{}", query);
        lease
            .fetch(query)
            .try_collect()
            .await
            .map_err(|e| self.translate(e))
    }

    /// Every item of the result: affected counts, rows and output parameters.
    pub async fn run_on(
        &self,
        lease: &mut Lease<D>,
        query: Query,
    ) -> Result<Vec<crate::QueryResult>> {
        log::debug!("{}", query);
        lease
            .run(query)
            .try_collect()
            .await
            .map_err(|e| self.translate(e))
    }

    pub async fn scalar_on(&self, lease: &mut Lease<D>, query: Query) -> Result<Option<Value>> {
        log::debug!("{}", query);
        lease.scalar(query).await.map_err(|e| self.translate(e))
    }

    /// Run a statement on its own lease.
    pub async fn execute(&self, query: impl Into<Query>) -> Result<RowsAffected> {
        let mut lease = self.acquire(true).await?;
        let result = self.execute_on(&mut lease, query.into()).await?;
        lease.release();
        Ok(result)
    }

    pub async fn fetch(&self, query: impl Into<Query>) -> Result<Vec<RowLabeled>> {
        let mut lease = self.acquire(true).await?;
        let result = self.fetch_on(&mut lease, query.into()).await?;
        lease.release();
        Ok(result)
    }

    async fn write_ddl(
        &self,
        metadata: &EntityMetadata,
        mut write: impl FnMut(&D::SqlWriter, &mut String, &EntityMetadata) -> Result<()>,
        details_first: bool,
    ) -> Result<()> {
        let writer = self.driver().sql_writer();
        let mut targets: Vec<&EntityMetadata> =
            metadata.details.iter().map(|v| v.child.as_ref()).collect();
        if details_first {
            targets.push(metadata);
        } else {
            targets.insert(0, metadata);
        }
        let mut lease = self.acquire(true).await?;
        for target in targets {
            let mut sql = String::new();
            write(&writer, &mut sql, target)?;
            self.execute_on(&mut lease, sql.into()).await?;
        }
        lease.release();
        Ok(())
    }

    /// Create the table of `E` (variant `0`) and its detail tables.
    pub async fn create_table<E: crate::Entity>(&self, if_not_exists: bool) -> Result<()> {
        let metadata = E::metadata(0)?;
        self.write_ddl(
            &metadata,
            |writer, out, metadata| writer.write_create_table(out, metadata, if_not_exists),
            false,
        )
        .await
    }

    /// Drop the detail tables of `E` (variant `0`) and its table.
    pub async fn drop_table<E: crate::Entity>(&self, if_exists: bool) -> Result<()> {
        let metadata = E::metadata(0)?;
        self.write_ddl(
            &metadata,
            |writer, out, metadata| writer.write_drop_table(out, metadata, if_exists),
            true,
        )
        .await
    }
}

enum LeaseKind<D: Driver> {
    Ambient {
        guard: OwnedMappedMutexGuard<Option<Box<dyn crate::AmbientConnection>>, D::Connection>,
        ambient: Arc<AmbientTransaction>,
    },
    Pooled {
        connection: D::Connection,
        database: Database<D>,
        keep: bool,
    },
}

/// A connection borrowed by one command.
///
/// Dropping a lease closes a pooled connection, [`Lease::release`] returns it
/// to the idle list when the command asked to keep it. Ambient leases only
/// unlock the ambient connection.
pub struct Lease<D: Driver> {
    kind: LeaseKind<D>,
}

impl<D: Driver> Lease<D> {
    pub fn is_ambient(&self) -> bool {
        matches!(self.kind, LeaseKind::Ambient { .. })
    }

    /// Mark an ambient lease as read by a stream until the returned value is
    /// dropped. Other statements of the scope fail meanwhile instead of
    /// waiting on the connection the stream holds.
    pub(crate) fn streaming(&self) -> Streaming {
        match &self.kind {
            LeaseKind::Ambient { ambient, .. } => {
                ambient.streaming.store(true, Ordering::Release);
                Streaming(Some(ambient.clone()))
            }
            LeaseKind::Pooled { .. } => Streaming(None),
        }
    }

    pub fn release(self) {
        if let LeaseKind::Pooled {
            connection,
            database,
            keep: true,
        } = self.kind
        {
            let mut idle = database.idle();
            if idle.len() < database.inner.max_idle && !connection.in_transaction() {
                idle.push(connection);
            }
        }
    }
}

pub(crate) struct Streaming(Option<Arc<AmbientTransaction>>);

impl Drop for Streaming {
    fn drop(&mut self) {
        if let Some(ambient) = &self.0 {
            ambient.streaming.store(false, Ordering::Release);
        }
    }
}

impl<D: Driver> Deref for Lease<D> {
    type Target = D::Connection;
    fn deref(&self) -> &Self::Target {
        match &self.kind {
            LeaseKind::Ambient { guard, .. } => guard,
            LeaseKind::Pooled { connection, .. } => connection,
        }
    }
}

impl<D: Driver> DerefMut for Lease<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.kind {
            LeaseKind::Ambient { guard, .. } => guard,
            LeaseKind::Pooled { connection, .. } => connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericSqlWriter, IsolationLevel, QueryResult, stream::Stream};

    #[derive(Default, Clone, Debug)]
    struct NullDriver;

    struct NullConnection;

    impl Driver for NullDriver {
        const NAME: &'static str = "null";
        type Connection = NullConnection;
        type SqlWriter = GenericSqlWriter;
        fn sql_writer(&self) -> GenericSqlWriter {
            GenericSqlWriter
        }
    }

    impl Executor for NullConnection {
        type Driver = NullDriver;
        fn driver(&self) -> &NullDriver {
            &NullDriver
        }
        fn run(&mut self, _query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
            crate::stream::empty()
        }
    }

    impl Connection for NullConnection {
        async fn connect(_url: &str) -> Result<Self> {
            Ok(NullConnection)
        }
        fn in_transaction(&self) -> bool {
            false
        }
        async fn begin(&mut self, _isolation: IsolationLevel) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn url_options() {
        let db = Database::<NullDriver>::new("null://memory?timeout=2.5&max_idle=1&mode=rwc")
            .expect("valid url");
        assert_eq!(db.url(), "null://memory?mode=rwc");
        assert_eq!(db.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(db.inner.max_idle, 1);

        let db = Database::<NullDriver>::builder("null://memory?timeout=3")
            .timeout(Duration::from_secs(1))
            .build()
            .expect("valid url");
        assert_eq!(db.url(), "null://memory");
        assert_eq!(db.timeout(), Some(Duration::from_secs(1)));

        assert!(Database::<NullDriver>::new("other://memory").is_err());
        assert!(Database::<NullDriver>::new("null://memory?max_idle=x").is_err());
    }

    #[tokio::test]
    async fn idle_reuse() {
        let db = Database::<NullDriver>::new("null://memory").expect("valid url");
        let lease = db.acquire(false).await.expect("lease");
        assert!(!lease.is_ambient());
        lease.release();
        assert_eq!(db.idle_connections(), 1);
        let lease = db.acquire(true).await.expect("lease");
        assert_eq!(db.idle_connections(), 0);
        lease.release();
        assert_eq!(db.idle_connections(), 0);
    }

    #[tokio::test]
    async fn error_hook() {
        let db = Database::<NullDriver>::builder("null://memory")
            .with_error_hook(|e| {
                e.to_string()
                    .contains("locked")
                    .then(|| Error::msg("translated"))
            })
            .build()
            .expect("valid url");
        assert_eq!(db.translate(Error::msg("database is locked")).to_string(), "translated");
        assert_eq!(db.translate(Error::msg("other")).to_string(), "other");
    }
}
