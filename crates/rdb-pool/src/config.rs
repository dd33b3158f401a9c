//! Pool configuration.

use std::time::Duration;

use rdb_client::statement_cache::DEFAULT_MAX_STATEMENTS;
use rdb_client::{Config, Error, Result};

/// Default period of the idle reaper.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Default time `close()` waits for leased connections to come back.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sizing and housekeeping knobs for a [`ConnectionPool`](crate::ConnectionPool).
///
/// Build one with [`PoolConfig::new`] and the setters, or derive it from a
/// parsed URL with [`PoolConfig::from_config`]. Fields are public for
/// reading; the struct is `#[non_exhaustive]` so it can grow.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connections created when the pool opens.
    pub init_cap: u32,

    /// Upper bound on open sessions, leased and idle together.
    pub max_cap: u32,

    /// Idle sessions above `init_cap` older than this are closed by the
    /// reaper. Zero keeps them forever.
    pub idle_timeout: Duration,

    /// Ping an idle session before handing it out.
    pub test_on_checkout: bool,

    /// Interval between idle reaper passes.
    pub reap_interval: Duration,

    /// How long `close()` waits for leased connections.
    pub close_timeout: Duration,

    /// Prepared statements cached per connection.
    pub statement_cache_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            init_cap: rdb_client::config::DEFAULT_INIT_CAP,
            max_cap: rdb_client::config::DEFAULT_MAX_CAP,
            idle_timeout: Duration::ZERO,
            test_on_checkout: false,
            reap_interval: DEFAULT_REAP_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            statement_cache_size: DEFAULT_MAX_STATEMENTS,
        }
    }
}

impl PoolConfig {
    /// Defaults: one session up front, ten at most, no idle reclamation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take pool sizing and idle timeout from a client configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            init_cap: config.init_cap,
            max_cap: config.max_cap,
            idle_timeout: config.idle_timeout,
            ..Self::default()
        }
    }

    /// Set the number of connections created at open.
    #[must_use]
    pub fn init_cap(mut self, count: u32) -> Self {
        self.init_cap = count;
        self
    }

    /// Upper bound on open sessions.
    #[must_use]
    pub fn max_cap(mut self, count: u32) -> Self {
        self.max_cap = count;
        self
    }

    /// Idle age after which surplus sessions are closed.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Ping idle sessions on lease.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Set the idle reaper period.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set how long `close()` waits for leased connections.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the per-connection prepared statement cache size.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Reject sizes the pool cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_cap == 0 {
            return Err(Error::Config("max_cap must be greater than 0".into()));
        }
        if self.init_cap == 0 {
            return Err(Error::Config("init_cap must be greater than 0".into()));
        }
        if self.init_cap > self.max_cap {
            return Err(Error::Config(
                "init_cap cannot be greater than max_cap".into(),
            ));
        }
        if !self.idle_timeout.is_zero() && self.reap_interval.is_zero() {
            return Err(Error::Config(
                "reap_interval must be greater than 0 when idle_timeout is set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.init_cap, 1);
        assert_eq!(config.max_cap, 10);
        assert!(config.idle_timeout.is_zero());
        assert!(!config.test_on_checkout);
        assert_eq!(config.statement_cache_size, DEFAULT_MAX_STATEMENTS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_setters() {
        let config = PoolConfig::new()
            .init_cap(3)
            .max_cap(7)
            .idle_timeout(Duration::from_secs(90))
            .test_on_checkout(true)
            .reap_interval(Duration::from_secs(5))
            .close_timeout(Duration::from_millis(100))
            .statement_cache_size(16);

        assert_eq!(config.init_cap, 3);
        assert_eq!(config.max_cap, 7);
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert!(config.test_on_checkout);
        assert_eq!(config.reap_interval, Duration::from_secs(5));
        assert_eq!(config.close_timeout, Duration::from_millis(100));
        assert_eq!(config.statement_cache_size, 16);
    }

    #[test]
    fn test_from_client_config() {
        let client = Config::new()
            .init_cap(2)
            .max_cap(4)
            .idle_timeout(Duration::from_secs(9));
        let config = PoolConfig::from_config(&client);
        assert_eq!(config.init_cap, 2);
        assert_eq!(config.max_cap, 4);
        assert_eq!(config.idle_timeout, Duration::from_secs(9));
        assert_eq!(config.reap_interval, DEFAULT_REAP_INTERVAL);
    }

    #[test]
    fn test_config_validation_init_greater_than_max() {
        let err = PoolConfig::new().init_cap(20).max_cap(10).validate();
        assert!(
            err.unwrap_err()
                .to_string()
                .contains("init_cap cannot be greater than max_cap")
        );
    }

    #[test]
    fn test_zero_max_cap_rejected() {
        let config = PoolConfig::new().max_cap(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_validation_zero_reap_interval() {
        let config = PoolConfig::new()
            .idle_timeout(Duration::from_secs(1))
            .reap_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = PoolConfig::new().reap_interval(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_equal_init_max() {
        let config = PoolConfig::new().init_cap(5).max_cap(5);
        assert!(config.validate().is_ok());
    }
}
