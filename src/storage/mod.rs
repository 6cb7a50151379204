//! Object Store Layer
//!
//! The put/get/delete/list collaborator the chunk engine runs on, its
//! backends, and the configuration that selects between them.

pub mod config;
pub mod object_store;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod simulated_store;

pub use config::{ChunkConfig, ConfigError, ObjectStoreType, SyncConfig, MAX_CHUNKS_PER_FILE};
pub use object_store::{
    InMemoryObjectStore, ListResult, LocalFsObjectStore, ObjectMeta, ObjectStore, StoreFuture,
};
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
#[cfg(feature = "s3")]
pub use config::S3Config;
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;

use std::sync::Arc;

/// Build the object store named by `config`
pub fn open_store(config: &SyncConfig) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    config.validate()?;
    match config.store_type {
        ObjectStoreType::InMemory => Ok(Arc::new(InMemoryObjectStore::new())),
        ObjectStoreType::LocalFs => {
            let path = config.local_path.clone().ok_or_else(|| {
                ConfigError::Invalid("local_path is required for the localfs store".to_string())
            })?;
            Ok(Arc::new(LocalFsObjectStore::new(path)))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => {
            let s3 = config.s3.clone().ok_or_else(|| {
                ConfigError::Invalid("[s3] section is required for the s3 store".to_string())
            })?;
            let store = S3ObjectStore::new(s3).map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&SyncConfig::test()).unwrap();
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_open_localfs_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&SyncConfig::local(dir.path().to_path_buf())).unwrap();
        store.put("a/b/c", b"v").await.unwrap();
        assert!(dir.path().join("a/b/c").is_file());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = SyncConfig::test();
        config.chunks.max_parallel_downloads = 0;
        assert!(open_store(&config).is_err());
    }
}
