//! Connection configuration.
//!
//! A [`ConnectionConfig`] is built once at startup and never mutated. It can
//! be assembled in code with the builder methods, or loaded from a JSON
//! config file whose keys follow the conventions of existing deployments
//! (several synonyms are accepted per field, see [`ConnectionConfig::from_file`]).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// User name assumed when none is configured.
pub const DEFAULT_USER: &str = "neo4j";
/// Password assumed when none is configured.
pub const DEFAULT_PASSWD: &str = "neo4j";
/// Server URI assumed when none is configured.
pub const DEFAULT_URI: &str = "neo4j://localhost:7687";

/// Config file names probed by [`ConnectionConfig::discover`], in order.
pub const CONFIG_FILES: [&str; 2] = ["bolt-session.json", "neo4j.json"];

/// Immutable connection settings, owned by the [`ConnectionManager`].
///
/// [`ConnectionManager`]: crate::pool::ConnectionManager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Protocol, host and port of the server, e.g. `neo4j://localhost:7687`.
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Whether the wire driver should dial with TLS.
    pub encrypted: bool,
    /// Upper bound on live connections, idle and checked out combined.
    pub max_pool_size: usize,
    /// How long a checkout may wait for a free connection.
    pub acquire_timeout: Duration,
    /// How long `shutdown` waits for in-flight connections to come home.
    pub shutdown_grace: Duration,
    /// Result fetch size forwarded to the server per query.
    pub fetch_size: usize,
    /// Default database for sessions that do not name one.
    pub database: Option<String>,
    /// Backoff policy for dial retries and transient query retries.
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_owned(),
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWD.to_owned(),
            encrypted: false,
            max_pool_size: 16,
            acquire_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            fetch_size: 1000,
            database: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), ..Self::default() }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load settings from a JSON config file, filling anything the file
    /// leaves out with defaults.
    ///
    /// Field synonyms are accepted so that files written for other tooling
    /// keep working: `host`/`address`/`server` for `uri`,
    /// `username`/`login` for `user`, `password`/`pw` for `passwd`,
    /// `database`/`graph`/`name` for `db`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|e| {
            Error::InvalidArgument(format!("config file {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "read connection config");
        Ok(file.into_config())
    }

    /// Probe the working directory for one of [`CONFIG_FILES`] and load it.
    /// Falls back to defaults when none exists.
    pub fn discover() -> Result<Self> {
        for candidate in CONFIG_FILES {
            if Path::new(candidate).exists() {
                return Self::from_file(candidate);
            }
        }
        warn!("no config file available, falling back to defaults");
        Ok(Self::default())
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(Error::InvalidArgument("server URI must not be empty".into()));
        }
        if self.max_pool_size == 0 {
            return Err(Error::InvalidArgument("max pool size must be at least 1".into()));
        }
        Ok(())
    }
}

/// On-disk shape of a config file. Only connection identity lives in the
/// file; pool sizing and timeouts are code-level concerns.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(alias = "host", alias = "address", alias = "server")]
    uri: Option<String>,
    #[serde(alias = "username", alias = "login")]
    user: Option<String>,
    #[serde(alias = "password", alias = "pw")]
    passwd: Option<String>,
    #[serde(alias = "database", alias = "graph", alias = "name")]
    db: Option<String>,
    fetch_size: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> ConnectionConfig {
        let mut config = ConnectionConfig::default();
        if let Some(uri) = self.uri {
            config.uri = uri;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(passwd) = self.passwd {
            config.password = passwd;
        }
        config.database = self.db;
        if let Some(fetch_size) = self.fetch_size {
            config.fetch_size = fetch_size;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.uri, "neo4j://localhost:7687");
        assert_eq!(config.user, "neo4j");
        assert_eq!(config.fetch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ConnectionConfig::new("bolt://db.example.org:7687")
            .with_auth("ada", "secret")
            .encrypted(true)
            .with_max_pool_size(4)
            .with_database("movies");
        assert_eq!(config.uri, "bolt://db.example.org:7687");
        assert_eq!(config.user, "ada");
        assert!(config.encrypted);
        assert_eq!(config.max_pool_size, 4);
        assert_eq!(config.database.as_deref(), Some("movies"));
    }

    #[test]
    fn test_config_file_synonyms() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"host": "neo4j://db:7687", "username": "ada", "pw": "secret", "graph": "movies"}"#,
        )
        .unwrap();
        let config = file.into_config();
        assert_eq!(config.uri, "neo4j://db:7687");
        assert_eq!(config.user, "ada");
        assert_eq!(config.password, "secret");
        assert_eq!(config.database.as_deref(), Some("movies"));
    }

    #[test]
    fn test_validate_rejects_empty_uri() {
        let config = ConnectionConfig::new("  ");
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
