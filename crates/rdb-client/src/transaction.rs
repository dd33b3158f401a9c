//! Transaction support.
//!
//! This module provides transaction isolation levels, savepoint bookkeeping,
//! and the [`Transaction`] capability.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::Queryer;
use crate::error::{Error, Result};

/// How much a transaction sees of concurrent work.
///
/// The discriminants are part of the contract: a level persisted or sent
/// over the wire as a number must keep its value. Not every backend supports
/// every level; a driver rejects an unsupported level with
/// [`Error::UnsupportedIsolation`] and never downgrades it silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// Whatever the backend uses when no level is requested.
    #[default]
    Default = 0,

    /// Uncommitted writes of other transactions are visible.
    ReadUncommitted = 1,

    /// Only committed data is visible; a second read of the same row may
    /// see a newer commit.
    ReadCommitted = 2,

    /// Write committed.
    WriteCommitted = 3,

    /// Rows already read stay as they were; new rows may still appear.
    RepeatableRead = 4,

    /// Serializable.
    ///
    /// Transactions behave as if executed one after another.
    Serializable = 5,

    /// Reads come from the state committed when the transaction began.
    Snapshot = 6,

    /// Linearizable.
    Linearizable = 7,
}

impl IsolationLevel {
    /// All levels in ordinal order.
    pub const ALL: [IsolationLevel; 8] = [
        Self::Default,
        Self::ReadUncommitted,
        Self::ReadCommitted,
        Self::WriteCommitted,
        Self::RepeatableRead,
        Self::Serializable,
        Self::Snapshot,
        Self::Linearizable,
    ];

    /// Get the isolation level name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::WriteCommitted => "WRITE COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
            Self::Linearizable => "LINEARIZABLE",
        }
    }

    /// Get the ordinal of this level.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<IsolationLevel> for u8 {
    fn from(level: IsolationLevel) -> Self {
        level.ordinal()
    }
}

impl TryFrom<u8> for IsolationLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| Error::Config(format!("invalid isolation level ordinal: {value}")))
    }
}

/// State of a transaction.
///
/// `Open` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting queries and savepoint operations.
    Open,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Validate a savepoint name.
///
/// Names are sent to backends verbatim, so they are restricted to
/// identifier characters.
pub fn validate_savepoint_name(name: &str) -> Result<()> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static IDENTIFIER_RE: Lazy<Option<Regex>> =
        Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_@#$]{0,127}$").ok());

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    let valid = IDENTIFIER_RE
        .as_ref()
        .is_some_and(|re| re.is_match(name));
    if !valid {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{}': must start with letter/underscore, \
             contain only alphanumerics/_/@/#/$, and be 1-128 characters",
            name
        )));
    }

    Ok(())
}

/// Insertion-ordered savepoint names of one transaction.
///
/// Creating a savepoint with a name already in use rebinds the name to the
/// new point, which moves it to the end of the order.
#[derive(Debug, Clone, Default)]
pub struct Savepoints {
    names: Vec<String>,
}

impl Savepoints {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new savepoint, rebinding an existing name.
    pub fn create(&mut self, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        self.names.retain(|n| n != name);
        self.names.push(name.to_string());
        Ok(())
    }

    /// Check that `name` exists, for a rollback to it.
    pub fn check(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(Error::UnknownSavepoint(name.to_string()))
        }
    }

    /// Forget every savepoint created after `name`.
    ///
    /// `name` itself survives, so it can be rolled back to again.
    pub fn rolled_back_to(&mut self, name: &str) -> Result<()> {
        let position = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::UnknownSavepoint(name.to_string()))?;
        self.names.truncate(position + 1);
        Ok(())
    }

    /// Check if a savepoint exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Savepoint names in creation order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of savepoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no savepoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Forget every savepoint.
    pub fn clear(&mut self) {
        self.names.clear();
    }
}

/// A unit of work pinned to one connection.
///
/// The isolation level is fixed when the transaction begins. `commit` and
/// `rollback` end the transaction and release its connection; afterwards
/// every operation fails with [`Error::TransactionClosed`].
///
/// # Example
///
/// ```rust,ignore
/// let mut tx = pool.begin(&cancel, IsolationLevel::Serializable).await?;
///
/// tx.query(&cancel, &insert_order, vec![Param::new(42)]).await?;
/// tx.save_point(&cancel, "before_items").await?;
///
/// tx.query(&cancel, &insert_items, vec![]).await?;
///
/// // Undo the items but keep the order
/// tx.rollback_to(&cancel, "before_items").await?;
///
/// tx.commit(&cancel).await?;
/// ```
#[async_trait]
pub trait Transaction: Queryer {
    /// Get the isolation level of this transaction.
    fn isolation(&self) -> IsolationLevel;

    /// Get the current state.
    fn state(&self) -> TransactionState;

    /// Create a savepoint, rebinding `name` if it already exists.
    async fn save_point(&mut self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Revert to a savepoint. The transaction stays open.
    async fn rollback_to(&mut self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Commit and release the connection.
    async fn commit(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Roll back and release the connection.
    async fn rollback(&mut self, cancel: &CancellationToken) -> Result<()>;
}
