//! The driver side of the contract.
//!
//! A backend plugs in by implementing [`Driver`] (a factory of physical
//! sessions), [`Session`] (one physical connection) and [`ResultSource`]
//! (the pending result sets of one execution). The generic pool in
//! `rdb-pool` turns any driver into the application-facing [`Pool`],
//! [`Connection`] and [`Transaction`] capabilities.
//!
//! These traits use `#[async_trait]` so sessions and sources can be used as
//! trait objects.
//!
//! [`Pool`]: crate::client::Pool
//! [`Connection`]: crate::client::Connection
//! [`Transaction`]: crate::transaction::Transaction

use async_trait::async_trait;
use rdb_types::SqlValue;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::error::Result;
use crate::param::{OutputBindings, Param};
use crate::row::Schema;
use crate::transaction::IsolationLevel;

/// A backend-assigned handle for a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub u64);

/// The pending result sets of one execution.
///
/// Sources own everything they need, so they outlive the borrow of the
/// session that produced them; the caller guarantees the session is not
/// used for anything else until the source is drained or dropped.
#[async_trait]
pub trait ResultSource: Send {
    /// Advance to the next result set and return its schema, skipping any
    /// unread rows of the current one. `None` means every set was consumed.
    async fn next_set(&mut self, cancel: &CancellationToken) -> Result<Option<Schema>>;

    /// Read the next row of the current result set.
    async fn next_row(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<SqlValue>>>;

    /// Discard the unread rows of the current result set.
    async fn discard(&mut self, cancel: &CancellationToken) -> Result<()> {
        while self.next_row(cancel).await?.is_some() {}
        Ok(())
    }

    /// Output parameter values as `(slot, value)` pairs.
    ///
    /// Only meaningful once `next_set` has returned `None`.
    fn take_outputs(&mut self) -> Vec<(usize, SqlValue)>;
}

/// What a session returns for an execution.
pub struct Execution {
    /// The pending result sets.
    pub source: Box<dyn ResultSource>,
    /// Output destinations, published once the source is drained.
    pub outputs: OutputBindings,
}

impl Execution {
    /// Create an execution with no output parameters.
    #[must_use]
    pub fn new(source: Box<dyn ResultSource>) -> Self {
        Self {
            source,
            outputs: OutputBindings::default(),
        }
    }

    /// Attach output destinations.
    #[must_use]
    pub fn with_outputs(mut self, outputs: OutputBindings) -> Self {
        self.outputs = outputs;
        self
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("outputs", &self.outputs.len())
            .finish_non_exhaustive()
    }
}

/// One physical backend session.
///
/// A session is used by one caller at a time; the pool guarantees it.
#[async_trait]
pub trait Session: Send + 'static {
    /// Prepare `command` and return its handle.
    async fn prepare(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
    ) -> Result<StatementHandle>;

    /// Release a prepared handle.
    async fn unprepare(&mut self, handle: StatementHandle) -> Result<()>;

    /// Check if a handle returned by `prepare` can still be executed.
    fn statement_valid(&self, handle: StatementHandle) -> bool;

    /// Execute `command`, through `handle` when it was prepared.
    ///
    /// Parameters are resolved with [`bind`](crate::param::bind) against
    /// the statement's signature. Results still pending from an earlier
    /// execution on this session are discarded first.
    async fn execute(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
        handle: Option<StatementHandle>,
        params: Vec<Param>,
    ) -> Result<Execution>;

    /// Begin a transaction. Unsupported levels fail with
    /// [`Error::UnsupportedIsolation`](crate::Error::UnsupportedIsolation).
    async fn begin(&mut self, cancel: &CancellationToken, isolation: IsolationLevel)
    -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Create or rebind a savepoint.
    async fn save_point(&mut self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Revert to a savepoint, keeping the transaction open.
    async fn rollback_to(&mut self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Check the session is alive.
    async fn ping(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Return the session to a clean state: roll back any transaction,
    /// discard pending results and invalidate prepared handles.
    async fn reset(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Close the session. Further use is invalid.
    async fn close(&mut self) -> Result<()>;

    /// Cheap liveness check without a round trip.
    fn is_valid(&self) -> bool;
}

/// A factory of physical sessions for one backend.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The session type.
    type Session: Session;

    /// Driver name, as used in connection URL schemes.
    fn name(&self) -> &str;

    /// Establish a new session.
    ///
    /// Failures are reported as [`Error::ConnectFailed`](crate::Error::ConnectFailed).
    async fn connect(&self) -> Result<Self::Session>;
}

/// Called exactly once when a [`Next`](crate::stream::Next) is finished
/// with, whether drained or dropped early.
pub trait Release: Send {
    /// `drained` is false when result sets were left unread or an error
    /// interrupted the query.
    fn release(self: Box<Self>, drained: bool);
}
