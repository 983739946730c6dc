//! Storage implementations for Tides.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;
use tides_core::error::StoreError;
use tides_core::store::ConciergeStore;

/// Build the configured store backend.
pub async fn build_from_config(
    config: &tides_config::StorageConfig,
) -> Result<Arc<dyn ConciergeStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            let url = format!("sqlite://{}", config.path.display());
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
        other => Err(StoreError::Unavailable(format!(
            "storage backend '{other}' is not available"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_memory_backend() {
        let config = tides_config::StorageConfig {
            backend: "memory".into(),
            path: "unused.db".into(),
        };
        let store = build_from_config(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn builds_sqlite_backend_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = tides_config::StorageConfig {
            backend: "sqlite".into(),
            path: dir.path().join("nested").join("tides.db"),
        };
        let store = build_from_config(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(config.path.exists());
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = tides_config::StorageConfig {
            backend: "postgres".into(),
            path: "unused.db".into(),
        };
        assert!(build_from_config(&config).await.is_err());
    }
}
