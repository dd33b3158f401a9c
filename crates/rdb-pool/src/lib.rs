//! # rdb-pool
//!
//! A driver-agnostic connection pool implementing the rdb client contract.
//!
//! Any [`Driver`](rdb_client::Driver) becomes a [`Pool`](rdb_client::Pool)
//! by wrapping it in a [`ConnectionPool`]. The pool owns the physical
//! sessions; callers lease them as [`PooledConnection`]s or
//! [`PooledTransaction`]s, or query the pool directly and let the returned
//! cursor hold the lease.
//!
//! ## Features
//!
//! - At most `max_cap` sessions, `init_cap` created at open
//! - Cancellable lease waits (a cancelled wait reports `PoolExhausted`)
//! - Session reset before reuse when a session comes back dirty
//! - Optional health check on checkout
//! - Idle reclamation after `idle_timeout`
//! - Per-session prepared statement cache keyed by command identity
//!
//! ## Example
//!
//! ```rust,ignore
//! use rdb_pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .init_cap(2)
//!     .max_cap(16)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = ConnectionPool::open(driver, config).await?;
//! let mut conn = pool.connection(&cancel).await?;
//! // Use connection...
//! conn.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod lifecycle;
pub mod pool;
mod session;
pub mod transaction;

pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use lifecycle::{SessionMeta, SessionState};
pub use pool::ConnectionPool;
pub use transaction::PooledTransaction;
