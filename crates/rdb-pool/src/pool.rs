//! Connection pool implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use rdb_client::cancel;
use rdb_client::{
    CancellationToken, Command, Driver, Error, IsolationLevel, Next, Param, Pool, PoolStatus,
    Queryer, Result, Session,
};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::lifecycle::SessionState;
use crate::session::{Lease, LeaseGuard, PooledSession};
use crate::transaction::PooledTransaction;

/// A connection pool over any [`Driver`].
///
/// The pool manages a bounded set of sessions, leasing each to one caller
/// at a time, resetting sessions that come back dirty and reclaiming idle
/// ones. Clones share the same pool.
pub struct ConnectionPool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

pub(crate) struct PoolInner<D: Driver> {
    driver: D,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    /// Idle sessions; leased from the back, reaped from the front.
    idle: Mutex<VecDeque<PooledSession<D::Session>>>,
    closed: AtomicBool,
    total: AtomicU32,
    in_use: AtomicU32,
    next_id: AtomicU64,
    /// Signalled whenever a session is closed.
    closed_session: Notify,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Driver> ConnectionPool<D> {
    /// Open a pool, creating `init_cap` sessions up front.
    ///
    /// If any initial session fails to connect, the ones already created
    /// are closed and the error is returned.
    pub async fn open(driver: D, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_cap as usize)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_cap as usize)),
            closed: AtomicBool::new(false),
            total: AtomicU32::new(0),
            in_use: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            closed_session: Notify::new(),
            reaper: Mutex::new(None),
            driver,
            config,
        });

        for _ in 0..inner.config.init_cap {
            match inner.driver.connect().await {
                Ok(session) => {
                    let mut entry = inner.adopt(session);
                    entry.meta.mark_returned();
                    inner.idle.lock().push_back(entry);
                }
                Err(e) => {
                    tracing::warn!(driver = inner.driver.name(), error = %e, "failed to open pool");
                    inner.shutdown().await;
                    return Err(e);
                }
            }
        }

        if !inner.config.idle_timeout.is_zero() {
            *inner.reaper.lock() = Some(spawn_reaper(&inner));
        }

        tracing::info!(
            driver = inner.driver.name(),
            init_cap = inner.config.init_cap,
            max_cap = inner.config.max_cap,
            "connection pool opened"
        );

        Ok(Self { inner })
    }

    /// Run `command` on a leased connection.
    ///
    /// The lease is held by the returned [`Next`] and given back when it is
    /// drained or dropped.
    pub async fn query(
        &self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'static>> {
        let mut lease = self.inner.lease(cancel).await?;
        let execution = lease.session()?.execute(cancel, command, params).await?;
        Ok(Next::new(execution, command.trunc_long_text()).with_guard(LeaseGuard(lease)))
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run one idle reclamation pass now.
    pub fn reap_idle(&self) {
        self.inner.reap();
    }
}

impl<D: Driver> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.inner.driver.name())
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl<D: Driver> Queryer for ConnectionPool<D> {
    async fn query<'a>(
        &'a mut self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'a>> {
        ConnectionPool::query(&*self, cancel, command, params).await
    }
}

#[async_trait]
impl<D: Driver> Pool for ConnectionPool<D> {
    type Connection = PooledConnection<D>;
    type Transaction = PooledTransaction<D>;

    async fn query_shared(
        &self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'static>> {
        ConnectionPool::query(self, cancel, command, params).await
    }

    async fn begin(
        &self,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
    ) -> Result<PooledTransaction<D>> {
        let lease = self.inner.lease(cancel).await?;
        PooledTransaction::begin(lease, cancel, isolation).await
    }

    async fn connection(&self, cancel: &CancellationToken) -> Result<PooledConnection<D>> {
        let lease = self.inner.lease(cancel).await?;
        Ok(PooledConnection::new(lease))
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let mut lease = self.inner.lease(cancel).await?;
        let entry = lease.session()?;
        let result = cancel::run(cancel, entry.session.ping(cancel)).await;
        if let Err(e) = &result {
            tracing::warn!(connection = entry.meta.id, error = %e, "ping failed");
            entry.dirty = true;
        }
        result
    }

    fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let available = if inner.closed.load(Ordering::Acquire) {
            0
        } else {
            u32::try_from(inner.semaphore.available_permits()).unwrap_or(u32::MAX)
        };
        PoolStatus {
            capacity: inner.config.max_cap,
            available,
            in_use: inner.in_use.load(Ordering::Acquire),
            idle: u32::try_from(inner.idle.lock().len()).unwrap_or(u32::MAX),
            total: inner.total.load(Ordering::Acquire),
        }
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown().await;
    }
}

impl<D: Driver> PoolInner<D> {
    /// Wrap a freshly connected session and count it.
    fn adopt(&self, session: D::Session) -> PooledSession<D::Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(connection = id, "session connected");
        PooledSession::new(session, id, self.config.statement_cache_size)
    }

    pub(crate) fn lease_started(&self) {
        self.in_use.fetch_add(1, Ordering::AcqRel);
    }

    /// Lease a session: reuse an idle one or connect a new one.
    pub(crate) async fn lease(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Lease<D>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::PoolExhausted),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| Error::PoolClosed)?
            }
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        loop {
            let candidate = self.idle.lock().pop_back();
            let Some(mut entry) = candidate else { break };
            match self.ready_for_lease(&mut entry, cancel).await {
                Ok(()) => return Ok(Lease::new(Arc::clone(self), entry, permit)),
                Err(Error::Cancelled) => {
                    self.discard(entry);
                    return Err(Error::PoolExhausted);
                }
                Err(e) => {
                    tracing::warn!(connection = entry.meta.id, error = %e, "discarding unhealthy connection");
                    self.discard(entry);
                }
            }
        }

        self.connect(cancel, permit).await
    }

    async fn ready_for_lease(
        &self,
        entry: &mut PooledSession<D::Session>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !entry.session.is_valid() {
            return Err(Error::ConnectionClosed);
        }
        entry.reset_if_dirty(cancel).await?;
        if self.config.test_on_checkout {
            cancel::run(cancel, entry.session.ping(cancel)).await?;
        }
        Ok(())
    }

    /// Connect a new session while holding `permit`.
    ///
    /// The connect runs in its own task. If `cancel` fires first, the task
    /// keeps the permit and checks the session in once it is established,
    /// so no session is lost or counted twice.
    async fn connect(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> Result<Lease<D>> {
        let pool = Arc::clone(self);
        let mut task = tokio::spawn(async move {
            let session = pool.driver.connect().await?;
            Ok::<_, Error>(pool.adopt(session))
        });

        tokio::select! {
            joined = &mut task => {
                let entry = joined.map_err(|e| Error::ConnectFailed(format!("connect task failed: {e}")))??;
                Ok(Lease::new(Arc::clone(self), entry, permit))
            }
            () = cancel.cancelled() => {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    if let Ok(Ok(entry)) = task.await {
                        tracing::trace!(connection = entry.meta.id, "connect finished after cancellation");
                        pool.checkin(entry);
                    }
                    drop(permit);
                });
                Err(Error::PoolExhausted)
            }
        }
    }

    /// Take back a session from a lease.
    pub(crate) fn checkin(self: &Arc<Self>, mut entry: PooledSession<D::Session>) {
        if entry.meta.state == SessionState::Leased {
            self.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        if entry.session.is_valid() {
            let mut idle = self.idle.lock();
            if !self.closed.load(Ordering::Acquire) {
                entry.meta.mark_returned();
                tracing::trace!(connection = entry.meta.id, dirty = entry.dirty, "connection returned");
                idle.push_back(entry);
                return;
            }
        }
        self.discard(entry);
    }

    /// Close a session in the background.
    fn discard(self: &Arc<Self>, mut entry: PooledSession<D::Session>) {
        entry.meta.mark_closed();
        let pool = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    entry.close().await;
                    pool.session_closed();
                });
            }
            Err(_) => {
                tracing::warn!(connection = entry.meta.id, "no runtime to close session, dropping it");
                drop(entry);
                pool.session_closed();
            }
        }
    }

    fn session_closed(&self) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.closed_session.notify_waiters();
    }

    /// Close idle sessions beyond `init_cap` that have been idle too long.
    fn reap(self: &Arc<Self>) {
        let timeout = self.config.idle_timeout;
        if timeout.is_zero() {
            return;
        }
        let keep = self.config.init_cap;
        let expired: Vec<_> = {
            let mut idle = self.idle.lock();
            // sessions still closing in the background are not counted
            let in_use = self.in_use.load(Ordering::Acquire);
            let mut live = u32::try_from(idle.len()).unwrap_or(u32::MAX).saturating_add(in_use);
            let mut expired = Vec::new();
            while live > keep
                && idle
                    .front()
                    .is_some_and(|entry| entry.meta.is_idle_expired(timeout))
            {
                if let Some(entry) = idle.pop_front() {
                    expired.push(entry);
                    live -= 1;
                }
            }
            expired
        };
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "reaping idle connections");
        }
        for entry in expired {
            self.discard(entry);
        }
    }

    /// Stop leasing, close idle sessions and wait for leased ones.
    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }

        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        let count = idle.len();
        join_all(idle.into_iter().map(|entry| async move {
            entry.close().await;
            self.session_closed();
        }))
        .await;

        let wait_leased = async {
            loop {
                let notified = self.closed_session.notified();
                if self.total.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(self.config.close_timeout, wait_leased)
            .await
            .is_err()
        {
            tracing::warn!(
                outstanding = self.total.load(Ordering::Acquire),
                "connections still leased at pool close; they will be closed when returned"
            );
        }

        tracing::info!(closed_idle = count, "connection pool closed");
    }
}

fn spawn_reaper<D: Driver>(inner: &Arc<PoolInner<D>>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.config.reap_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(pool) = weak.upgrade() else { break };
            if pool.closed.load(Ordering::Acquire) {
                break;
            }
            pool.reap();
        }
    })
}
