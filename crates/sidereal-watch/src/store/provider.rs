use std::sync::Arc;

use crate::config::StorageConfig;
use crate::{WatchError, WatchResult};

use super::EntryStore;

#[cfg(feature = "memory")]
use super::MemoryStore;

#[cfg(feature = "sqlite")]
use super::SqliteStore;

#[cfg(feature = "valkey")]
use super::ValkeyStore;

/// Open the store selected by configuration.
///
/// Fails with [`WatchError::UnsupportedBackend`] when the backend's cargo
/// feature is not enabled.
pub async fn open_store(config: &StorageConfig) -> WatchResult<Arc<dyn EntryStore>> {
    tracing::debug!(backend = config.backend_name(), "opening entry store");

    match config {
        #[cfg(feature = "memory")]
        StorageConfig::Memory { max_entries } => Ok(Arc::new(match max_entries {
            Some(max) => MemoryStore::with_max_entries(*max),
            None => MemoryStore::new(),
        })),

        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite {
            url,
            max_connections,
        } => Ok(Arc::new(SqliteStore::new(url, *max_connections).await?)),

        #[cfg(feature = "valkey")]
        StorageConfig::Valkey {
            url,
            namespace,
            pool_size,
        } => Ok(Arc::new(
            ValkeyStore::new(url, namespace.clone(), *pool_size).await?,
        )),

        #[allow(unreachable_patterns)]
        _ => Err(WatchError::UnsupportedBackend(format!(
            "{} support is not enabled",
            config.backend_name()
        ))),
    }
}
