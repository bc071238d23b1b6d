//! Configuration management.
//!
//! Values come from three layers, later layers winning: built-in defaults, a
//! TOML file (`load_from_file` / `load_default`), and `TIERQUEUE_*`
//! environment variables (`with_env_overrides`).

use crate::models::QueueProperty;
use crate::storage::sqlite::PoolConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for tierqueue.
#[derive(Debug, Clone, Default)]
pub struct TierQueueConfig {
    /// Default capacity of queues created without explicit bounds.
    pub queue: QueueProperty,
    /// Persistent store settings.
    pub sqlite: SqliteSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Persistent store settings.
#[derive(Debug, Clone)]
pub struct SqliteSettings {
    /// Database file.
    pub path: PathBuf,
    /// Table holding the entries of every queue.
    pub table_name: String,
    /// Upper bound on open connections.
    pub max_connections: usize,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    /// Delay between reconnect attempts after connection loss.
    pub reconnect_interval: Duration,
    /// Ping idle connections before handing them out.
    pub test_on_checkout: bool,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            path: default_database_path(),
            table_name: crate::storage::sqlite::QueueTable::DEFAULT_TABLE_NAME.to_string(),
            max_connections: pool.max_connections,
            acquire_timeout: pool.acquire_timeout,
            reconnect_interval: pool.reconnect_interval,
            test_on_checkout: pool.test_on_checkout,
        }
    }
}

impl SqliteSettings {
    /// Pool configuration derived from these settings.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_max_connections(self.max_connections)
            .with_acquire_timeout(self.acquire_timeout)
            .with_reconnect_interval(self.reconnect_interval)
            .with_test_on_checkout(self.test_on_checkout)
    }
}

/// Logging settings as read from configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `tierqueue=debug`.
    pub filter: Option<String>,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Queue implementation selected by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// In-memory tier only.
    Ram,
    /// Relational tier only.
    Jdbc,
    /// In-memory hot tier in front of the relational tier.
    #[default]
    Cache,
}

impl QueueKind {
    /// Parses a kind name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "RAM" => Ok(Self::Ram),
            "JDBC" => Ok(Self::Jdbc),
            "CACHE" => Ok(Self::Cache),
            other => Err(Error::InvalidInput(format!(
                "unknown queue kind '{other}', expected RAM, JDBC or CACHE"
            ))),
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ram => "RAM",
            Self::Jdbc => "JDBC",
            Self::Cache => "CACHE",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Default queue capacity.
    pub queue: Option<ConfigFileQueue>,
    /// Persistent store.
    pub sqlite: Option<ConfigFileSqlite>,
    /// Logging.
    pub logging: Option<ConfigFileLogging>,
}

/// Queue section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileQueue {
    /// Entry limit.
    pub max_entries: Option<u64>,
    /// Byte limit.
    pub max_bytes: Option<u64>,
    /// Hot tier entry limit.
    pub max_entries_cache: Option<u64>,
    /// Hot tier byte limit.
    pub max_bytes_cache: Option<u64>,
}

/// `SQLite` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileSqlite {
    /// Database file.
    pub path: Option<String>,
    /// Table name.
    pub table_name: Option<String>,
    /// Connection limit.
    pub max_connections: Option<usize>,
    /// Checkout timeout in milliseconds.
    pub acquire_timeout_ms: Option<u64>,
    /// Reconnect interval in milliseconds.
    pub reconnect_interval_ms: Option<u64>,
    /// Ping on checkout.
    pub test_on_checkout: Option<bool>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file.
    pub file: Option<String>,
}

impl TierQueueConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// queue bounds are inconsistent.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the text is not valid
    /// configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::ConfigurationError(format!("invalid config file: {e}")))?;
        let config = Self::from_config_file(file);
        config.queue.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config dir>/tierqueue/config.toml` (platform specific) and then
    /// `~/.config/tierqueue/config.toml`. Returns the defaults if neither
    /// exists or parses.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("tierqueue").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("tierqueue")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Applies `TIERQUEUE_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TIERQUEUE_DB_PATH` | `sqlite.path` |
    /// | `TIERQUEUE_TABLE_NAME` | `sqlite.table_name` |
    /// | `TIERQUEUE_MAX_CONNECTIONS` | `sqlite.max_connections` |
    /// | `TIERQUEUE_RECONNECT_INTERVAL_MS` | `sqlite.reconnect_interval` |
    /// | `TIERQUEUE_MAX_ENTRIES` | `queue.max_entries` |
    /// | `TIERQUEUE_MAX_BYTES` | `queue.max_bytes` |
    /// | `TIERQUEUE_LOG_FORMAT` | `logging.format` |
    /// | `TIERQUEUE_LOG_FILTER` | `logging.filter` |
    /// | `TIERQUEUE_LOG_FILE` | `logging.file` |
    ///
    /// Values that do not parse are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(path) = var("TIERQUEUE_DB_PATH") {
            self.sqlite.path = PathBuf::from(path);
        }
        if let Some(table) = var("TIERQUEUE_TABLE_NAME") {
            self.sqlite.table_name = table;
        }
        if let Some(max) = number("TIERQUEUE_MAX_CONNECTIONS").and_then(|v| usize::try_from(v).ok()) {
            self.sqlite.max_connections = max;
        }
        if let Some(ms) = number("TIERQUEUE_RECONNECT_INTERVAL_MS") {
            self.sqlite.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(max) = number("TIERQUEUE_MAX_ENTRIES") {
            self.queue.max_entries = max;
            self.queue.max_entries_cache = self.queue.max_entries_cache.min(max);
        }
        if let Some(max) = number("TIERQUEUE_MAX_BYTES") {
            self.queue.max_bytes = max;
            self.queue.max_bytes_cache = self.queue.max_bytes_cache.min(max);
        }
        if let Some(format) = var("TIERQUEUE_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Some(filter) = var("TIERQUEUE_LOG_FILTER") {
            self.logging.filter = Some(filter);
        }
        if let Some(file) = var("TIERQUEUE_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Converts a `ConfigFile` to `TierQueueConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(queue) = file.queue {
            if let Some(v) = queue.max_entries {
                config.queue.max_entries = v;
                config.queue.max_entries_cache = config.queue.max_entries_cache.min(v);
            }
            if let Some(v) = queue.max_bytes {
                config.queue.max_bytes = v;
                config.queue.max_bytes_cache = config.queue.max_bytes_cache.min(v);
            }
            if let Some(v) = queue.max_entries_cache {
                config.queue.max_entries_cache = v;
            }
            if let Some(v) = queue.max_bytes_cache {
                config.queue.max_bytes_cache = v;
            }
        }
        if let Some(sqlite) = file.sqlite {
            if let Some(path) = sqlite.path {
                config.sqlite.path = PathBuf::from(path);
            }
            if let Some(table) = sqlite.table_name {
                config.sqlite.table_name = table;
            }
            if let Some(v) = sqlite.max_connections {
                config.sqlite.max_connections = v;
            }
            if let Some(ms) = sqlite.acquire_timeout_ms {
                config.sqlite.acquire_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = sqlite.reconnect_interval_ms {
                config.sqlite.reconnect_interval = Duration::from_millis(ms);
            }
            if let Some(v) = sqlite.test_on_checkout {
                config.sqlite.test_on_checkout = v;
            }
        }
        if let Some(logging) = file.logging {
            config.logging.format = logging.format;
            config.logging.filter = logging.filter;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite.path = path.into();
        self
    }
}

/// Default database location under the platform data directory.
fn default_database_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("tierqueue.db"),
        |dirs| dirs.data_local_dir().join("tierqueue").join("queues.db"),
    )
}
