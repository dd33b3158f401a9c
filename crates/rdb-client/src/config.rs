//! Connection configuration.
//!
//! A [`Config`] is built once, either through the builder methods or by
//! decoding a connection URL, and handed to a driver's pool constructor.
//!
//! ```text
//! scheme://[user:pass@]host[:port]/[instance][?opt=val&...]
//! memory:///orders?init_cap=2&max_cap=8
//! pg://alice:secret@db.example.com:5432/primary?db=app&idle_timeout=30s
//! sqlite:///srv/folder/file.sqlite3?journal=wal
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Default number of connections created at startup.
pub const DEFAULT_INIT_CAP: u32 = 1;

/// Default maximum number of connections.
pub const DEFAULT_MAX_CAP: u32 = 10;

/// Configuration for a database connection pool.
///
/// File based drivers take the file name from [`Config::instance`].
/// Driver-specific settings live in [`Config::options`].
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Driver name (the URL scheme).
    pub driver: String,

    /// The connection string this config was decoded from, if any.
    pub raw: String,

    /// User name.
    pub username: String,

    /// Password.
    pub password: String,

    /// Server hostname or IP address.
    pub hostname: String,

    /// Server port (0 when unspecified).
    pub port: u16,

    /// Instance name, or the file name for file based drivers.
    pub instance: String,

    /// Initial database to connect to.
    pub database: String,

    /// Time after which an idle connection may be closed. Zero disables it.
    pub idle_timeout: Duration,

    /// Number of connections to create at startup (`0 < init_cap <= max_cap`).
    pub init_cap: u32,

    /// Maximum number of connections (`0 < max_cap`).
    pub max_cap: u32,

    /// Require a secure transport.
    pub secure: bool,

    /// Do not verify the remote host name. Ignored unless `secure` is set.
    pub insecure_skip_verify: bool,

    /// Driver-specific options.
    pub options: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: String::new(),
            raw: String::new(),
            username: String::new(),
            password: String::new(),
            hostname: String::new(),
            port: 0,
            instance: String::new(),
            database: String::new(),
            idle_timeout: Duration::ZERO,
            init_cap: DEFAULT_INIT_CAP,
            max_cap: DEFAULT_MAX_CAP,
            secure: false,
            insecure_skip_verify: false,
            options: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a connection URL.
    ///
    /// Recognized query options:
    ///
    /// - `db`: [`Config::database`]
    /// - `init_cap`: [`Config::init_cap`]
    /// - `max_cap`: [`Config::max_cap`]
    /// - `idle_timeout`: [`Config::idle_timeout`], e.g. `30s`, `250ms`, `5m`
    ///
    /// Every other key is kept in [`Config::options`]; when a key repeats,
    /// the last value wins. Empty values leave the default in place. Any
    /// failure rejects the whole string with [`Error::ConfigParse`].
    pub fn from_url(conn_str: &str) -> Result<Self> {
        let url = Url::parse(conn_str.trim())
            .map_err(|e| Error::ConfigParse(format!("invalid connection URL: {e}")))?;

        let mut config = Self {
            driver: url.scheme().to_string(),
            raw: conn_str.to_string(),
            username: decode_component(url.username(), "username")?,
            password: match url.password() {
                Some(password) => decode_component(password, "password")?,
                None => String::new(),
            },
            hostname: url
                .host_str()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
                .unwrap_or_default(),
            port: url.port().unwrap_or(0),
            ..Self::default()
        };

        if let Some(path) = url.path().strip_prefix('/') {
            config.instance = decode_component(path, "instance")?;
        }

        for (key, value) in url.query_pairs() {
            let value = value.trim();
            match key.as_ref() {
                "db" => config.database = value.to_string(),
                "init_cap" if !value.is_empty() => {
                    config.init_cap = value.parse().map_err(|_| {
                        Error::ConfigParse(format!("invalid init_cap: {value}"))
                    })?;
                }
                "max_cap" if !value.is_empty() => {
                    config.max_cap = value.parse().map_err(|_| {
                        Error::ConfigParse(format!("invalid max_cap: {value}"))
                    })?;
                }
                "idle_timeout" if !value.is_empty() => {
                    config.idle_timeout = humantime::parse_duration(value).map_err(|e| {
                        Error::ConfigParse(format!("invalid idle_timeout '{value}': {e}"))
                    })?;
                }
                "init_cap" | "max_cap" | "idle_timeout" => {}
                _ => {
                    config.options.insert(key.into_owned(), value.to_string());
                }
            }
        }

        tracing::debug!(
            driver = %config.driver,
            host = %config.hostname,
            instance = %config.instance,
            "decoded connection URL"
        );

        Ok(config)
    }

    /// Set the driver name.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the server host.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the number of connections created at startup.
    #[must_use]
    pub fn init_cap(mut self, count: u32) -> Self {
        self.init_cap = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_cap(mut self, count: u32) -> Self {
        self.max_cap = count;
        self
    }

    /// Require a secure transport.
    #[must_use]
    pub fn secure(mut self, enabled: bool) -> Self {
        self.secure = enabled;
        self
    }

    /// Skip host name verification on secure transports.
    #[must_use]
    pub fn insecure_skip_verify(mut self, enabled: bool) -> Self {
        self.insecure_skip_verify = enabled;
        self
    }

    /// Set a driver-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Get a driver-specific option.
    #[must_use]
    pub fn get_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Check if the remote host name must be verified.
    #[must_use]
    pub fn verify_host(&self) -> bool {
        self.secure && !self.insecure_skip_verify
    }

    /// Validate pool sizing.
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
        Ok(())
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_url(s)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("driver", &self.driver)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("instance", &self.instance)
            .field("database", &self.database)
            .field("idle_timeout", &self.idle_timeout)
            .field("init_cap", &self.init_cap)
            .field("max_cap", &self.max_cap)
            .field("secure", &self.secure)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("options", &self.options)
            .finish()
    }
}

fn decode_component(raw: &str, what: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| Error::ConfigParse(format!("invalid {what} encoding: {e}")))
}
