//! Application-facing capabilities.
//!
//! Every execution context (a pool, a leased connection, a transaction)
//! implements [`Queryer`]. [`Pool`] adds leasing and transactions,
//! [`Connection`] adds an explicit close.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::error::Result;
use crate::param::Param;
use crate::stream::Next;
use crate::transaction::{IsolationLevel, Transaction};

/// Submit a command and get back its pending result sets.
#[async_trait]
pub trait Queryer: Send {
    /// Run `command` with `params`.
    ///
    /// The returned [`Next`] borrows this context; drain or drop it before
    /// issuing another query here.
    async fn query<'a>(
        &'a mut self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'a>>;
}

/// A snapshot of pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Maximum number of connections.
    pub capacity: u32,
    /// Leases that could be granted right now without waiting.
    pub available: u32,
    /// Connections currently leased.
    pub in_use: u32,
    /// Connections idle in the pool.
    pub idle: u32,
    /// Connections that exist, idle or leased.
    pub total: u32,
}

impl PoolStatus {
    /// Fraction of capacity in use (0.0 to 1.0).
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            f64::from(self.in_use) / f64::from(self.capacity)
        }
    }
}

/// A bounded set of connections to one backend.
///
/// Querying a pool directly leases a connection for the lifetime of the
/// returned [`Next`]. Pools are shared: every method takes `&self`, so one
/// pool serves any number of concurrent callers.
#[async_trait]
pub trait Pool: Queryer + Sync {
    /// The leased connection type.
    type Connection: Connection;
    /// The transaction type.
    type Transaction: Transaction;

    /// Run `command` through a shared reference.
    ///
    /// Same as [`Queryer::query`] on the pool, but the returned [`Next`]
    /// owns its lease instead of borrowing the pool, so callers holding
    /// only `&Self` can query concurrently.
    async fn query_shared(
        &self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'static>>;

    /// Lease a connection and begin a transaction on it.
    async fn begin(
        &self,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
    ) -> Result<Self::Transaction>;

    /// Lease a connection for exclusive use.
    ///
    /// Waits while every connection is leased. Cancelling the wait fails
    /// with [`Error::PoolExhausted`](crate::Error::PoolExhausted).
    async fn connection(&self, cancel: &CancellationToken) -> Result<Self::Connection>;

    /// Check the backend is reachable.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    /// Get a snapshot of pool accounting.
    fn status(&self) -> PoolStatus;

    /// Close the pool and every connection it owns. Idempotent.
    async fn close(&self);
}

/// A leased connection.
#[async_trait]
pub trait Connection: Queryer {
    /// Return the connection to its pool. Idempotent; queries after close
    /// fail with [`Error::ConnectionClosed`](crate::Error::ConnectionClosed).
    async fn close(&mut self);
}
