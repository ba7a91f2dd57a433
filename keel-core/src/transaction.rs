use crate::{
    Connection, Database, Driver, IsolationLevel, Result, TransactionError, error::raise,
    future::{BoxFuture, FutureExt},
};
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    future::Future,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{sync::OwnedMutexGuard, task::JoinHandle};

tokio::task_local! {
    static CURRENT: Option<TransactionScope>;
}

static AMBIENT_ID: AtomicU64 = AtomicU64::new(1);

/// How a new scope relates to the scope current in its flow.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Share the current ambient, or start one when there is none.
    #[default]
    Join,
    /// Always start a new ambient, chained to the current one.
    StartNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Begin a transaction when the ambient connection is opened.
    pub transactional: bool,
    pub isolation: IsolationLevel,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            transactional: true,
            isolation: IsolationLevel::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientStatus {
    Active,
    Committed,
    RolledBack,
}

/// Connection held by an ambient, type erased so that one scope tree can be
/// shared by commands of any entity.
pub(crate) trait AmbientConnection: Send + Sync + 'static {
    fn database_id(&self) -> u64;
    fn connection_any(&mut self) -> &mut (dyn Any + Send);
    /// Begin the owned transaction unless already begun.
    fn begin(&mut self) -> BoxFuture<'_, Result<()>>;
    fn commit(&mut self) -> BoxFuture<'_, Result<()>>;
    fn rollback(&mut self) -> BoxFuture<'_, Result<()>>;
}

pub(crate) enum SlotConnection<C> {
    /// Opened by the ambient, closed when its root scope is disposed.
    Owned(C),
    /// Supplied by the caller, only the lock is released.
    External(OwnedMutexGuard<C>),
}

impl<C> Deref for SlotConnection<C> {
    type Target = C;
    fn deref(&self) -> &C {
        match self {
            SlotConnection::Owned(c) => c,
            SlotConnection::External(c) => c,
        }
    }
}

impl<C> DerefMut for SlotConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        match self {
            SlotConnection::Owned(c) => c,
            SlotConnection::External(c) => c,
        }
    }
}

pub(crate) struct AmbientSlot<C: Connection> {
    pub(crate) database_id: u64,
    pub(crate) connection: SlotConnection<C>,
    /// Whether this ambient begins, commits and rolls back the transaction.
    pub(crate) owns_transaction: bool,
    pub(crate) isolation: IsolationLevel,
    pub(crate) begun: bool,
}

impl<C: Connection> AmbientConnection for AmbientSlot<C> {
    fn database_id(&self) -> u64 {
        self.database_id
    }

    fn connection_any(&mut self) -> &mut (dyn Any + Send) {
        &mut *self.connection
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.owns_transaction && !self.begun {
                self.connection.begin(self.isolation).await?;
                self.begun = true;
            }
            Ok(())
        }
        .boxed()
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.begun {
                self.begun = false;
                self.connection.commit().await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.begun {
                self.begun = false;
                self.connection.rollback().await?;
            }
            Ok(())
        }
        .boxed()
    }
}

pub(crate) type Slot = Arc<tokio::sync::Mutex<Option<Box<dyn AmbientConnection>>>>;

#[derive(Debug)]
struct AmbientState {
    ref_count: usize,
    status: AmbientStatus,
}

/// The unit of work shared by a root scope and every scope joining it.
pub struct AmbientTransaction {
    id: u64,
    state: Mutex<AmbientState>,
    pub(crate) slot: Slot,
    /// Set while a stream reads from the ambient connection.
    pub(crate) streaming: AtomicBool,
    previous: Option<Arc<AmbientTransaction>>,
    pub(crate) options: ScopeOptions,
    external: bool,
}

impl AmbientTransaction {
    fn new(previous: Option<Arc<AmbientTransaction>>, options: ScopeOptions, external: bool) -> Self {
        Self {
            id: AMBIENT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(AmbientState {
                ref_count: 1,
                status: AmbientStatus::Active,
            }),
            slot: Default::default(),
            streaming: AtomicBool::new(false),
            previous,
            options,
            external,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AmbientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Scopes participating in this ambient that did not complete yet.
    pub fn ref_count(&self) -> usize {
        self.state().ref_count
    }

    pub fn status(&self) -> AmbientStatus {
        self.state().status
    }

    /// The ambient that was current when this one was started.
    pub fn previous(&self) -> Option<&Arc<AmbientTransaction>> {
        self.previous.as_ref()
    }

    pub fn options(&self) -> ScopeOptions {
        self.options
    }

    /// Whether the connection was supplied by the caller.
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Error for any status other than `Active`.
    pub(crate) fn check_active(&self) -> Result<()> {
        match self.status() {
            AmbientStatus::Active => Ok(()),
            AmbientStatus::RolledBack => Err(raise(TransactionError::RolledBack)),
            AmbientStatus::Committed => Err(raise(TransactionError::AlreadyCommitted)),
        }
    }

    async fn commit(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let result = match slot.as_mut() {
            Some(connection) => connection.commit().await,
            None => Ok(()),
        };
        let mut state = self.state();
        state.status = if result.is_ok() {
            AmbientStatus::Committed
        } else {
            AmbientStatus::RolledBack
        };
        state.ref_count = 0;
        if result.is_ok() {
            log::debug!("Ambient transaction {} committed", self.id);
        }
        result
    }

    async fn rollback(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        log::debug!("Ambient transaction {} rolled back", self.id);
        match slot.as_mut() {
            Some(connection) => connection.rollback().await,
            None => Ok(()),
        }
    }

    /// Drop the connection: closes it when owned, unlocks it when external.
    async fn release(&self) {
        let connection = self.slot.lock().await.take();
        drop(connection);
    }
}

impl PartialEq for AmbientTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Debug for AmbientTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("AmbientTransaction")
            .field("id", &self.id)
            .field("ref_count", &state.ref_count)
            .field("status", &state.status)
            .field("previous", &self.previous.as_ref().map(|v| v.id))
            .field("external", &self.external)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ScopeFlags {
    completed: bool,
    disposed: bool,
}

struct ScopeInner {
    ambient: Arc<AmbientTransaction>,
    root: bool,
    flags: Mutex<ScopeFlags>,
}

impl ScopeInner {
    fn flags(&self) -> std::sync::MutexGuard<'_, ScopeFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let flags = self.flags();
        if flags.disposed || flags.completed {
            return;
        }
        drop(flags);
        log::warn!(
            "Transaction scope dropped without dispose, ambient {} is rolled back",
            self.ambient.id
        );
        let mut state = self.ambient.state();
        state.status = AmbientStatus::RolledBack;
        state.ref_count = 0;
    }
}

/// A nestable unit of work.
///
/// Commands executed inside [`TransactionScope::enter`] share the connection of
/// the scope's ambient, opened on first use and kept in a transaction when the
/// ambient is transactional. The transaction commits when the last
/// participating scope completes and rolls back as soon as one of them is
/// disposed without completing.
///
/// ```rust,no_run
/// # use keel_core::{ScopeMode, TransactionScope, Result};
/// # async fn example() -> Result<()> {
/// TransactionScope::run(ScopeMode::Join, |scope| async move {
///     // commands here share one connection and one transaction
///     scope.complete().await
/// })
/// .await
/// # }
/// ```
#[derive(Clone)]
pub struct TransactionScope {
    inner: Arc<ScopeInner>,
}

impl TransactionScope {
    pub fn new(mode: ScopeMode) -> Self {
        Self::with_options(mode, ScopeOptions::default())
    }

    /// `options` only apply when a new ambient is started.
    pub fn with_options(mode: ScopeMode, options: ScopeOptions) -> Self {
        let current = Self::current();
        match (mode, current) {
            (ScopeMode::Join, Some(current)) => {
                let ambient = current.inner.ambient.clone();
                ambient.state().ref_count += 1;
                log::trace!("Scope joined ambient {}", ambient.id);
                Self::from_parts(ambient, false)
            }
            (_, current) => {
                let previous = current.map(|v| v.inner.ambient.clone());
                let ambient = Arc::new(AmbientTransaction::new(previous, options, false));
                log::trace!("Scope started ambient {}", ambient.id);
                Self::from_parts(ambient, true)
            }
        }
    }

    /// Root scope over a connection supplied by the caller. The connection is
    /// locked for the lifetime of the scope and never closed by it. When
    /// `external_transaction` is true the caller also owns the transaction and
    /// the scope never begins, commits or rolls back.
    pub async fn attach<D: Driver>(
        database: &Database<D>,
        connection: Arc<tokio::sync::Mutex<D::Connection>>,
        external_transaction: bool,
        options: ScopeOptions,
    ) -> Result<Self> {
        let previous = Self::current().map(|v| v.inner.ambient.clone());
        let ambient = Arc::new(AmbientTransaction::new(previous, options, true));
        let guard = connection.lock_owned().await;
        *ambient.slot.lock().await = Some(Box::new(AmbientSlot {
            database_id: database.id(),
            connection: SlotConnection::External(guard),
            owns_transaction: options.transactional && !external_transaction,
            isolation: options.isolation,
            begun: false,
        }));
        Ok(Self::from_parts(ambient, true))
    }

    fn from_parts(ambient: Arc<AmbientTransaction>, root: bool) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                ambient,
                root,
                flags: Default::default(),
            }),
        }
    }

    /// The innermost scope entered by the calling flow.
    pub fn current() -> Option<TransactionScope> {
        CURRENT.try_with(|v| v.clone()).ok().flatten()
    }

    pub fn ambient(&self) -> &Arc<AmbientTransaction> {
        &self.inner.ambient
    }

    /// Whether this scope started its ambient.
    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    pub fn is_completed(&self) -> bool {
        self.inner.flags().completed
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.flags().disposed
    }

    /// Mark the scope as successful. Calling it again has no effect.
    ///
    /// Each call decrements the ambient reference count and the call that
    /// brings it to zero commits. Order does not matter: when the root
    /// completes before a joined scope, the ambient stays open and the joined
    /// scope's `complete` is the one that commits.
    pub async fn complete(&self) -> Result<()> {
        let ambient = &self.inner.ambient;
        let commit = {
            let mut flags = self.inner.flags();
            if flags.disposed {
                return Err(raise(TransactionError::Disposed));
            }
            if flags.completed {
                return Ok(());
            }
            ambient.check_active()?;
            let mut state = ambient.state();
            state.ref_count = state.ref_count.saturating_sub(1);
            flags.completed = true;
            state.ref_count == 0
        };
        if commit {
            ambient.commit().await?;
        }
        Ok(())
    }

    /// End the scope. A scope not completed rolls its ambient back. The root
    /// scope also releases the ambient connection. Calling it again has no effect.
    pub async fn dispose(&self) -> Result<()> {
        let ambient = &self.inner.ambient;
        let completed = {
            let mut flags = self.inner.flags();
            if flags.disposed {
                return Ok(());
            }
            flags.disposed = true;
            flags.completed
        };
        let rollback = {
            let mut state = ambient.state();
            let active = state.status == AmbientStatus::Active;
            if !completed || (self.inner.root && active) {
                state.status = AmbientStatus::RolledBack;
                state.ref_count = 0;
            }
            active && (!completed || self.inner.root)
        };
        let result = if rollback {
            ambient.rollback().await
        } else {
            Ok(())
        };
        if self.inner.root {
            ambient.release().await;
        }
        result
    }

    /// Run `future` with this scope as the current one.
    pub async fn enter<F: Future>(&self, future: F) -> F::Output {
        CURRENT.scope(Some(self.clone()), future).await
    }

    /// Create a scope, run `f` inside it and dispose it. `f` is expected to
    /// call [`complete`](Self::complete) on success.
    pub async fn run<F, Fut, T>(mode: ScopeMode, f: F) -> Result<T>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = Self::new(mode);
        let result = scope.enter(f(scope.clone())).await;
        let disposed = scope.dispose().await;
        let value = result?;
        disposed?;
        Ok(value)
    }
}

impl PartialEq for TransactionScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for TransactionScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let flags = self.inner.flags();
        f.debug_struct("TransactionScope")
            .field("ambient", &self.inner.ambient)
            .field("root", &self.inner.root)
            .field("completed", &flags.completed)
            .field("disposed", &flags.disposed)
            .finish()
    }
}

/// Spawn a task that sees the scope current in the calling flow.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match TransactionScope::current() {
        Some(scope) => tokio::spawn(async move { scope.enter(future).await }),
        None => tokio::spawn(future),
    }
}
