//! # rdb-client
//!
//! A vendor-neutral contract for relational database clients.
//!
//! Applications program against the capabilities defined here ([`Pool`],
//! [`Connection`], [`Transaction`] and the [`Queryer`] they share) and a
//! driver supplies the backend. The generic pool in `rdb-pool` turns any
//! [`Driver`] into those capabilities.
//!
//! ## Features
//!
//! - **Multiple result sets**: one query yields a [`Next`] that is drained
//!   set by set, streaming ([`QueryStream`]) or buffered ([`Buffer`])
//! - **Parameters**: named or positional, output parameters published once
//!   the last result set is read, stream-valued inputs
//! - **Prepared statements**: cached per connection, keyed by command identity
//! - **Transactions**: eight isolation levels and savepoints
//! - **Cancellation**: every blocking call takes a [`CancellationToken`]
//!
//! ## Query Lifecycle
//!
//! ```text
//! Pool ──query──────────────────────────────┐
//!   ├──connection──> Connection ──query──────┤
//!   └──begin───────> Transaction ──query─────┤
//!                                            v
//!          Next ──result──> QueryStream ──scan──> Row
//!               ──buffer──> Buffer ──────scan──> Row
//!               ──result──> Err(NoMoreResults)   (outputs ready)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use rdb_client::{Command, Config, Param, Pool, Queryer, IsolationLevel};
//!
//! let config: Config = "memory://localhost/orders?max_cap=4".parse()?;
//! let pool = rdb_memory::open(&config).await?;
//! let cancel = CancellationToken::new();
//!
//! let mut tx = pool.begin(&cancel, IsolationLevel::Serializable).await?;
//! let insert = Command::new("put").with_prepare(true);
//! tx.query(&cancel, &insert, vec![Param::new("k"), Param::new("v")]).await?;
//! tx.save_point(&cancel, "after_put").await?;
//! tx.commit(&cancel).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod client;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod param;
pub mod row;
pub mod statement_cache;
pub mod stream;
pub mod transaction;

// Re-export commonly used types
pub use client::{Connection, Pool, PoolStatus, Queryer};
pub use command::{Command, CommandId};
pub use config::Config;
pub use driver::{Driver, Execution, Release, ResultSource, Session, StatementHandle};
pub use error::{Error, Result};
pub use param::{Output, Param, ParamSlot, ParamValue};
pub use rdb_types::{FromSql, SqlType, SqlValue, ToSql, TypeError};
pub use row::{Column, Dest, Row, Schema};
pub use statement_cache::{PreparedStatement, StatementCache};
pub use stream::{Buffer, Next, QueryStream};
pub use tokio_util::sync::CancellationToken;
pub use transaction::{IsolationLevel, Savepoints, Transaction, TransactionState};
