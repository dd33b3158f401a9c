//! Leased connections.

use async_trait::async_trait;
use rdb_client::{
    CancellationToken, Command, Connection, Driver, Error, IsolationLevel, Next, Param, Queryer,
    Result,
};

use crate::session::{DirtyGuard, Lease};
use crate::transaction::PooledTransaction;

/// A connection leased from a [`ConnectionPool`](crate::ConnectionPool).
///
/// Returned to the pool by [`close`](Connection::close) or when dropped.
pub struct PooledConnection<D: Driver> {
    lease: Option<Lease<D>>,
    id: u64,
}

impl<D: Driver> PooledConnection<D> {
    pub(crate) fn new(lease: Lease<D>) -> Self {
        let id = lease.id();
        Self {
            lease: Some(lease),
            id,
        }
    }

    /// Pool-local identifier of the underlying session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check if the connection has been returned to its pool.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }

    /// Begin a transaction on this connection.
    ///
    /// The connection moves into the transaction and goes back to the pool
    /// when the transaction ends or is dropped.
    pub async fn begin(
        mut self,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
    ) -> Result<PooledTransaction<D>> {
        let lease = self.lease.take().ok_or(Error::ConnectionClosed)?;
        PooledTransaction::begin(lease, cancel, isolation).await
    }
}

#[async_trait]
impl<D: Driver> Queryer for PooledConnection<D> {
    async fn query<'a>(
        &'a mut self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'a>> {
        let lease = self.lease.as_mut().ok_or(Error::ConnectionClosed)?;
        let entry = lease.session()?;
        let execution = entry.execute(cancel, command, params).await?;
        Ok(Next::new(execution, command.trunc_long_text()).with_guard(DirtyGuard(&mut entry.dirty)))
    }
}

#[async_trait]
impl<D: Driver> Connection for PooledConnection<D> {
    async fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::trace!(connection = self.id, "closing connection");
            drop(lease);
        }
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
