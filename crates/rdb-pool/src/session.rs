//! Pooled sessions and leases.

use std::sync::Arc;

use rdb_client::cancel;
use rdb_client::{
    CancellationToken, Command, Driver, Error, Execution, Param, PreparedStatement, Release,
    Result, Session, StatementCache, StatementHandle,
};
use tokio::sync::OwnedSemaphorePermit;

use crate::lifecycle::SessionMeta;
use crate::pool::PoolInner;

/// A physical session together with the state the pool keeps for it.
pub(crate) struct PooledSession<S> {
    pub(crate) session: S,
    pub(crate) meta: SessionMeta,
    pub(crate) cache: StatementCache,
    /// Set when the session may hold leftover state: unread results, an
    /// abandoned transaction or an interrupted operation.
    pub(crate) dirty: bool,
}

impl<S: Session> PooledSession<S> {
    pub(crate) fn new(session: S, id: u64, cache_size: usize) -> Self {
        Self {
            session,
            meta: SessionMeta::new(id),
            cache: StatementCache::new(cache_size),
            dirty: false,
        }
    }

    /// Run `command`, preparing it through the statement cache when asked.
    pub(crate) async fn execute(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Execution> {
        tracing::debug!(
            command = %command.id(),
            name = command.display_name(),
            connection = self.meta.id,
            prepare = command.prepare(),
            "executing command"
        );

        let handle = if command.prepare() {
            Some(self.prepared(cancel, command).await?)
        } else {
            None
        };

        let result = cancel::run(
            cancel,
            self.session.execute(cancel, command, handle, params),
        )
        .await;
        if let Err(e) = &result {
            if matches!(e, Error::StaleStatement) {
                tracing::debug!(command = %command.id(), "evicting stale prepared statement");
                self.cache.remove(command.id());
            }
            self.dirty = true;
        }
        result
    }

    async fn prepared(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
    ) -> Result<StatementHandle> {
        if let Some(handle) = self.cache.get(command) {
            if self.session.statement_valid(handle) {
                return Ok(handle);
            }
            tracing::debug!(command = %command.id(), "cached statement invalidated, preparing again");
            self.cache.remove(command.id());
        }

        let handle = match cancel::run(cancel, self.session.prepare(cancel, command)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.dirty = true;
                return Err(e);
            }
        };
        if let Some(evicted) = self.cache.insert(PreparedStatement::new(handle, command)) {
            if let Err(e) = self.session.unprepare(evicted.handle()).await {
                tracing::warn!(
                    connection = self.meta.id,
                    handle = evicted.handle().0,
                    error = %e,
                    "failed to release evicted statement"
                );
            }
        }
        Ok(handle)
    }

    /// Return a dirty session to a clean state before reuse.
    pub(crate) async fn reset_if_dirty(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.dirty {
            tracing::debug!(connection = self.meta.id, "resetting session");
            cancel::run(cancel, self.session.reset(cancel)).await?;
            self.cache.clear();
            self.dirty = false;
        }
        Ok(())
    }

    pub(crate) async fn close(mut self) {
        self.meta.mark_closed();
        if let Err(e) = self.session.close().await {
            tracing::warn!(connection = self.meta.id, error = %e, "failed to close session");
        } else {
            tracing::trace!(connection = self.meta.id, "session closed");
        }
    }
}

/// Exclusive use of one pooled session, returned to the pool on drop.
///
/// The semaphore permit is released after the session is back in the idle
/// set, so the number of sessions never exceeds the pool capacity.
pub(crate) struct Lease<D: Driver> {
    pool: Arc<PoolInner<D>>,
    entry: Option<PooledSession<D::Session>>,
    _permit: OwnedSemaphorePermit,
}

impl<D: Driver> Lease<D> {
    pub(crate) fn new(
        pool: Arc<PoolInner<D>>,
        mut entry: PooledSession<D::Session>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        entry.meta.mark_leased();
        pool.lease_started();
        tracing::trace!(connection = entry.meta.id, "connection leased");
        Self {
            pool,
            entry: Some(entry),
            _permit: permit,
        }
    }

    pub(crate) fn session(&mut self) -> Result<&mut PooledSession<D::Session>> {
        self.entry.as_mut().ok_or(Error::ConnectionClosed)
    }

    pub(crate) fn id(&self) -> u64 {
        self.entry.as_ref().map_or(0, |e| e.meta.id)
    }

    pub(crate) fn mark_dirty(&mut self) {
        if let Some(entry) = self.entry.as_mut() {
            entry.dirty = true;
        }
    }
}

impl<D: Driver> Drop for Lease<D> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.checkin(entry);
        }
    }
}

/// Returns the lease of a pool-level query once its results are finished.
pub(crate) struct LeaseGuard<D: Driver>(pub(crate) Lease<D>);

impl<D: Driver> Release for LeaseGuard<D> {
    fn release(self: Box<Self>, drained: bool) {
        let mut lease = self.0;
        if !drained {
            lease.mark_dirty();
        }
    }
}

/// Marks a borrowed session dirty when its results are abandoned.
pub(crate) struct DirtyGuard<'a>(pub(crate) &'a mut bool);

impl Release for DirtyGuard<'_> {
    fn release(self: Box<Self>, drained: bool) {
        if !drained {
            *self.0 = true;
        }
    }
}
