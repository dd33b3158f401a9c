//! # rdb-memory
//!
//! An in-process reference driver for the rdb client contract.
//!
//! A [`MemoryServer`] stands in for a database: it holds key/value data
//! and a table of procedures that commands name in their SQL text. Each
//! procedure declares a parameter signature and runs a closure that can
//! read and write data, emit result sets and set output parameters.
//! Servers can inject connect and ping failures, latency and prepared
//! statement invalidation, which makes the driver suitable for testing
//! pool and cursor behavior without a network.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rdb_client::{CancellationToken, Command, Config, Param, Pool, Queryer};
//! use rdb_memory::MemoryServer;
//!
//! MemoryServer::builder("orders").with_kv_procedures().build().register();
//!
//! let config: Config = "memory://localhost/orders?max_cap=4".parse()?;
//! let pool = rdb_memory::open(&config).await?;
//! let cancel = CancellationToken::new();
//!
//! let mut next = pool
//!     .query(&cancel, &Command::new("put"), vec![Param::new("a"), Param::new(1)])
//!     .await?;
//! while next.result(&cancel).await.is_ok() {}
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod server;
pub mod session;
mod store;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rdb_client::{Config, Error, Result};
use rdb_pool::{ConnectionPool, PoolConfig};

pub use server::{
    DEFAULT_ISOLATION_LEVELS, Handler, MemoryServer, MemoryServerBuilder, ProcContext, Procedure,
    ServerStats,
};
pub use session::{MemoryDriver, MemorySession, MemorySource};

/// Driver name used in connection URLs.
pub const DRIVER_NAME: &str = "memory";

/// A pool of memory sessions.
pub type MemoryPool = ConnectionPool<MemoryDriver>;

static REGISTRY: Lazy<Mutex<HashMap<String, MemoryServer>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

impl MemoryServer {
    /// Make the server reachable by name from [`open`], replacing any
    /// server registered under the same name.
    pub fn register(&self) {
        REGISTRY
            .lock()
            .insert(self.name().to_string(), self.clone());
    }
}

/// Remove a server from the registry, returning it.
pub fn unregister(name: &str) -> Option<MemoryServer> {
    REGISTRY.lock().remove(name)
}

/// Find a registered server.
#[must_use]
pub fn lookup(name: &str) -> Option<MemoryServer> {
    REGISTRY.lock().get(name).cloned()
}

/// Open a pool from a connection configuration.
///
/// The URL scheme must be `memory` and the path names a registered server,
/// e.g. `memory://localhost/orders?init_cap=2&max_cap=8`. Pool sizing and
/// idle timeout come from the configuration.
pub async fn open(config: &Config) -> Result<MemoryPool> {
    if config.driver != DRIVER_NAME {
        return Err(Error::Config(format!(
            "driver '{}' is not handled by the memory driver",
            config.driver
        )));
    }
    let server = lookup(&config.instance).ok_or_else(|| {
        Error::ConnectFailed(format!("no memory server named '{}'", config.instance))
    })?;
    open_with(server, PoolConfig::from_config(config)).await
}

/// Open a pool on `server` directly.
pub async fn open_with(server: MemoryServer, config: PoolConfig) -> Result<MemoryPool> {
    tracing::debug!(server = server.name(), "opening memory pool");
    ConnectionPool::open(MemoryDriver::new(server), config).await
}
