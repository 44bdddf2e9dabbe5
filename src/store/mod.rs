//! Durable key/value persistence for checkpoints and job logs.
//!
//! Backends implement [`KeyValueStore`]; JSON helpers come from the
//! [`StoreExt`] blanket extension. The job engine talks to the store through
//! a [`CheckpointWriter`], which orders writes on a background task.

mod error;
mod file;
mod memory;
mod writer;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::*;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use writer::*;

use crate::config::StorageConfig;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Raw value stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

// Helper extension trait for working with JSON
pub trait StoreExt: KeyValueStore {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize + Sync>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set(key, &bytes).await
    }
}

// Blanket implementation for all KeyValueStore types
impl<T: KeyValueStore + ?Sized> StoreExt for T {}

/// Build the configured backend.
pub async fn build_store(config: &StorageConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    match config {
        StorageConfig::File(file) => {
            let path = file.resolve_path();
            tracing::info!(path = ?path, "Using file checkpoint store");
            Ok(Arc::new(FileStore::new(path).await?))
        }
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory checkpoint store; progress will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
