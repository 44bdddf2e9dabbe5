//! Checkpoint storage configuration.
//!
//! ```toml
//! [storage]
//! type = "file"
//! path = "/var/lib/sweeper"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Storage backend for checkpoints and job logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// One JSON file per key inside a directory. Survives restarts.
    File(FileStorageConfig),
    /// Process-local map. Nothing survives a restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::File(FileStorageConfig::default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileStorageConfig {
    /// Directory for the store. Defaults to the platform data directory.
    /// A leading `~/` is expanded to the home directory.
    #[serde(default)]
    pub path: Option<String>,
}

impl FileStorageConfig {
    /// Resolve the storage directory, falling back to `<data_dir>/sweeper`.
    pub fn resolve_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => expand_home(path),
            None => dirs::data_dir()
                .map(|dir| dir.join("sweeper"))
                .unwrap_or_else(|| PathBuf::from(".sweeper")),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
