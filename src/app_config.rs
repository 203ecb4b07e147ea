use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::database::sqlite::MEMORY_PATH;
use crate::errors::{DatabaseError, DbResult};

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings, plus the environment
/// overlay that selects the storage backend.

/// Environment variable holding the remote connection string
pub const ENV_DATABASE_URL: &str = "LEXISTORE_DATABASE_URL";

/// Fallback connection string variable understood by most hosting platforms
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";

/// Environment variable naming the deployment (`production` selects the remote backend)
pub const ENV_DEPLOYMENT: &str = "LEXISTORE_ENV";

/// Environment variable overriding the embedded database path
pub const ENV_DB_PATH: &str = "LEXISTORE_DB_PATH";

/// Longest accepted cache lifetime (ten years)
pub const MAX_TTL_HOURS: i64 = 87_600;

/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Lemma cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Which storage engine serves the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local file-resident engine
    Embedded,
    /// Hosted engine reached through a connection string
    Remote,
}

/// Performance settings applied to the embedded backend only
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SqliteTuning {
    /// Page cache size in KiB
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u64,

    /// Memory-mapped I/O window in bytes
    #[serde(default = "default_mmap_size_bytes")]
    pub mmap_size_bytes: u64,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for SqliteTuning {
    fn default() -> Self {
        Self {
            cache_size_kib: default_cache_size_kib(),
            mmap_size_bytes: default_mmap_size_bytes(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Embedded database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Remote connection string; selects the remote backend when present
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Production deployment; requires the remote backend
    #[serde(default)]
    pub production: bool,

    /// Pool size for the remote backend
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout for the remote backend
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub tuning: SqliteTuning,

    /// Seconds between maintenance sweeps (0 disables the periodic task)
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            remote_url: None,
            production: false,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            tuning: SqliteTuning::default(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory embedded database (for testing)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            ..Self::default()
        }
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from an environment lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_DATABASE_URL).or_else(|| non_empty(ENV_DATABASE_URL_FALLBACK)) {
            self.remote_url = Some(url);
        }
        if let Some(deployment) = non_empty(ENV_DEPLOYMENT) {
            self.production = deployment.eq_ignore_ascii_case("production");
        }
        if let Some(path) = non_empty(ENV_DB_PATH) {
            self.path = PathBuf::from(path);
        }
    }

    /// Backend chosen by this configuration
    pub fn backend_kind(&self) -> DbResult<BackendKind> {
        let has_url = self
            .remote_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());

        match (has_url, self.production) {
            (true, _) => Ok(BackendKind::Remote),
            (false, true) => Err(DatabaseError::Connection(format!(
                "production deployment requires a connection string in {} or {}",
                ENV_DATABASE_URL, ENV_DATABASE_URL_FALLBACK
            ))),
            (false, false) => Ok(BackendKind::Embedded),
        }
    }
}

/// Lemma cache configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Lifetime of a cached lemma
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// Characters of context kept in context-aware cache keys
    #[serde(default = "default_context_snippet_chars")]
    pub context_snippet_chars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            context_snippet_chars: default_context_snippet_chars(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("lexistore.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_cache_size_kib() -> u64 {
    64 * 1024 // 64 MiB page cache
}

fn default_mmap_size_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_maintenance_interval_secs() -> u64 {
    60 * 60
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_context_snippet_chars() -> usize {
    50
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DatabaseError::Config(format!("Failed to open config file {:?}: {}", path, e))
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            DatabaseError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DbResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DatabaseError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, json).map_err(|e| {
            DatabaseError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Overlay the process environment onto the storage settings
    pub fn apply_env(&mut self) {
        self.database.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> DbResult<()> {
        self.database.backend_kind()?;

        if self.cache.ttl_hours <= 0 {
            return Err(DatabaseError::Config(
                "cache.ttl_hours must be positive".to_string(),
            ));
        }

        if self.cache.ttl_hours > MAX_TTL_HOURS {
            return Err(DatabaseError::Config(format!(
                "cache.ttl_hours must be at most {} (got {})",
                MAX_TTL_HOURS, self.cache.ttl_hours
            )));
        }

        if self.database.max_connections == 0 {
            return Err(DatabaseError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.database.maintenance_interval_secs == 0 {
            return Err(DatabaseError::Config(
                "database.maintenance_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.database.remote_url.is_none() && self.database.path.as_os_str().is_empty() {
            return Err(DatabaseError::Config(
                "database.path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
