//! Client error types.

use thiserror::Error;

use crate::transaction::IsolationLevel;

/// Errors that can occur during client operations.
///
/// [`Error::NoMoreResults`] and [`Error::EndOfRows`] are sentinels that end
/// normal iteration; see [`Error::is_sentinel`].
#[derive(Debug, Error)]
pub enum Error {
    /// No connection became available before the lease was cancelled.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Operation on a pool that has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// A physical connection could not be established.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The backend rejected the requested isolation level.
    #[error("isolation level {0} is not supported")]
    UnsupportedIsolation(IsolationLevel),

    /// Operation on a transaction that was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,

    /// Every result set of the query has been consumed.
    #[error("no more results")]
    NoMoreResults,

    /// Every row of the result set has been read.
    #[error("end of rows")]
    EndOfRows,

    /// An output parameter was read before all result sets were drained.
    #[error("output parameter is not ready")]
    OutputNotReady,

    /// A value is longer than the declared length and truncation is off.
    #[error("value for {name} has length {length}, exceeding declared length {max}")]
    TextTruncated {
        /// Parameter name.
        name: String,
        /// Actual length.
        length: usize,
        /// Declared length.
        max: usize,
    },

    /// Column lookup by an unrecognized name or index.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Two destinations were bound to the same column.
    #[error("column bound more than once: {0}")]
    DuplicateBinding(String),

    /// Malformed connection string or option value.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Query on a connection that was returned to its pool.
    #[error("connection closed")]
    ConnectionClosed,

    /// Parameter binding failed.
    #[error("bind error: {0}")]
    Bind(String),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] rdb_types::TypeError),

    /// Rollback to a savepoint that does not exist.
    #[error("unknown savepoint: {0}")]
    UnknownSavepoint(String),

    /// Invalid identifier (potential SQL injection attempt).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A cached prepared statement is no longer valid on the session.
    #[error("prepared statement is stale")]
    StaleStatement,

    /// Any other failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted | Self::ConnectFailed(_) | Self::StaleStatement | Self::Cancelled
        )
    }

    /// Check if this error marks the normal end of an iteration.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::NoMoreResults | Self::EndOfRows)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
