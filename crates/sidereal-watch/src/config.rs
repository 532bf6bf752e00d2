//! Configuration types for the watch crate.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::tags::SlowThresholds;
use crate::WatchError;

// ============================================================================
// Default configuration constants
// ============================================================================

/// Default number of buffered entries that triggers a flush.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Default periodic flush interval in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Default number of `save_batch` attempts per flush.
pub const DEFAULT_FLUSH_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_FLUSH_INITIAL_DELAY_MS: u64 = 100;

/// Default cap on the retry delay in milliseconds.
pub const DEFAULT_FLUSH_MAX_DELAY_MS: u64 = 10_000;

/// Default hard cap on buffered entries while storage is failing.
pub const DEFAULT_MAX_BUFFERED_ENTRIES: usize = 10_000;

/// Default SQLite database URL.
pub const DEFAULT_SQLITE_URL: &str = "sqlite://watch.db";

/// Default SQLite pool size.
pub const DEFAULT_SQLITE_MAX_CONNECTIONS: u32 = 5;

/// Default Valkey key namespace.
pub const DEFAULT_VALKEY_NAMESPACE: &str = "watch";

/// Default Valkey pool size.
pub const DEFAULT_VALKEY_POOL_SIZE: usize = 10;

/// Watch configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Collector buffering and retry behaviour.
    pub collector: CollectorConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Slow thresholds used by the tag classifier.
    pub tags: SlowThresholds,
}

impl WatchConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `watch.toml` in current directory
    /// 3. Environment variables prefixed with `WATCH_`, nested with `__`
    ///    (e.g. `WATCH_COLLECTOR__BUFFER_SIZE=500`)
    pub fn load() -> Result<Self, WatchError> {
        Self::load_from("watch.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &str) -> Result<Self, WatchError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("WATCH_").split("__"))
            .extract()
            .map_err(|e| WatchError::Config(e.to_string()))
    }
}

/// Collector configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Buffered entry count that triggers an immediate flush.
    pub buffer_size: usize,
    /// Periodic flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Total `save_batch` attempts per flush (at least one is always made).
    pub flush_max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    ///
    /// The delay doubles after each failed attempt, up to `flush_max_delay_ms`.
    pub flush_initial_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub flush_max_delay_ms: u64,
    /// Hard cap on buffered entries; the oldest are dropped beyond it.
    ///
    /// `None` lets the buffer grow without bound while storage is down.
    pub max_buffered_entries: Option<usize>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_max_attempts: DEFAULT_FLUSH_MAX_ATTEMPTS,
            flush_initial_delay_ms: DEFAULT_FLUSH_INITIAL_DELAY_MS,
            flush_max_delay_ms: DEFAULT_FLUSH_MAX_DELAY_MS,
            max_buffered_entries: Some(DEFAULT_MAX_BUFFERED_ENTRIES),
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process maps. Data is lost when the process exits.
    Memory {
        /// Oldest entries are evicted beyond this many.
        #[serde(default)]
        max_entries: Option<usize>,
    },
    /// Embedded SQLite database.
    Sqlite {
        /// Database URL, e.g. `sqlite://watch.db` or `sqlite::memory:`.
        #[serde(default = "default_sqlite_url")]
        url: String,
        #[serde(default = "default_sqlite_max_connections")]
        max_connections: u32,
    },
    /// Valkey or Redis server.
    Valkey {
        url: String,
        #[serde(default = "default_valkey_namespace")]
        namespace: String,
        #[serde(default = "default_valkey_pool_size")]
        pool_size: usize,
    },
}

impl StorageConfig {
    /// Name of the selected backend, as written in configuration.
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::Sqlite { .. } => "sqlite",
            Self::Valkey { .. } => "valkey",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory { max_entries: None }
    }
}

fn default_sqlite_url() -> String {
    DEFAULT_SQLITE_URL.to_owned()
}

const fn default_sqlite_max_connections() -> u32 {
    DEFAULT_SQLITE_MAX_CONNECTIONS
}

fn default_valkey_namespace() -> String {
    DEFAULT_VALKEY_NAMESPACE.to_owned()
}

const fn default_valkey_pool_size() -> usize {
    DEFAULT_VALKEY_POOL_SIZE
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn collector_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        assert_eq!(config.flush_max_attempts, DEFAULT_FLUSH_MAX_ATTEMPTS);
        assert_eq!(config.max_buffered_entries, Some(DEFAULT_MAX_BUFFERED_ENTRIES));
    }

    #[test]
    fn storage_defaults_to_memory() {
        match StorageConfig::default() {
            StorageConfig::Memory { max_entries } => assert_eq!(max_entries, None),
            other => panic!("expected memory storage as default, got {other:?}"),
        }
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [collector]
            buffer_size = 25
            flush_max_attempts = 5

            [storage]
            backend = "sqlite"
            url = "sqlite::memory:"

            [tags]
            request = 250.0
            "#
        )
        .unwrap();

        let config = WatchConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.collector.buffer_size, 25);
        assert_eq!(config.collector.flush_max_attempts, 5);
        assert_eq!(config.collector.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        assert!((config.tags.request - 250.0).abs() < f64::EPSILON);
        match config.storage {
            StorageConfig::Sqlite {
                url,
                max_connections,
            } => {
                assert_eq!(url, "sqlite::memory:");
                assert_eq!(max_connections, DEFAULT_SQLITE_MAX_CONNECTIONS);
            }
            other => panic!("expected sqlite storage, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = WatchConfig::load_from("/nonexistent/watch.toml").unwrap();
        assert_eq!(config.collector.buffer_size, DEFAULT_BUFFER_SIZE);
    }
}
