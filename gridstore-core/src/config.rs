use crate::bucket::{BucketOptions, DEFAULT_BUCKET_NAME};
use crate::error::{GridError, Result};
use crate::operations::DEFAULT_CHUNK_SIZE;
use crate::storage::{DocumentStore, MemoryStore, SqliteStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

fn default_bucket_name() -> String {
    DEFAULT_BUCKET_NAME.to_string()
}

fn default_chunk_size() -> u64 {
    u64::from(DEFAULT_CHUNK_SIZE)
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            bucket_name: default_bucket_name(),
            chunk_size_bytes: default_chunk_size(),
            store: StoreConfig::default(),
        }
    }
}

impl GridConfig {
    /// Load from a config file, overridden by `GRIDSTORE__*` environment variables.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("GRIDSTORE").separator("__"))
            .build()
            .map_err(|e| GridError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| GridError::Config(e.to_string()))
    }

    /// SQLite store at `path` with default bucket settings.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                path: Some(path.into()),
            },
            ..Self::default()
        }
    }

    pub fn bucket_options(&self) -> BucketOptions {
        BucketOptions::default()
            .bucket_name(self.bucket_name.clone())
            .chunk_size_bytes(self.chunk_size_bytes)
    }

    pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>> {
        if self.bucket_name.trim().is_empty() {
            return Err(GridError::Config("bucket_name cannot be empty".to_string()));
        }

        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => {
                let path = self.store.path.as_ref().ok_or_else(|| {
                    GridError::Config("store.path is required for sqlite backend".to_string())
                })?;
                if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                Ok(Arc::new(SqliteStore::open(path)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_with_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("gridstore.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "bucket_name = \"media\"").unwrap();
        writeln!(file, "[store]").unwrap();
        writeln!(file, "backend = \"sqlite\"").unwrap();
        writeln!(file, "path = \"grid.db\"").unwrap();
        drop(file);

        let config = GridConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.bucket_name, "media");
        assert_eq!(config.chunk_size_bytes, 255_000);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);

        let options = config.bucket_options();
        assert_eq!(options.files_collection(), "media.files");
    }

    #[test]
    fn test_sqlite_requires_path() {
        let mut config = GridConfig::default();
        config.store.backend = StoreBackend::Sqlite;
        assert!(matches!(config.open_store(), Err(GridError::Config(_))));
    }

    #[test]
    fn test_empty_bucket_name_rejected() {
        let config = GridConfig {
            bucket_name: "  ".to_string(),
            ..GridConfig::default()
        };
        assert!(matches!(config.open_store(), Err(GridError::Config(_))));
    }
}
