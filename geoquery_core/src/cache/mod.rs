//! Persisted storage for downloaded model artifacts.
//!
//! Artifacts are grouped into named caches (`webllm/model`, `webllm/config`,
//! `webllm/wasm`) and are enumerable by resource name, which is how cache
//! status is derived for a model.
//!
//! # Layout
//!
//! - one directory per named cache under the store root
//! - one JSON entry per resource, file name = SHA-256 of the resource name
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), geoquery_core::error::StorageError> {
//! use geoquery_core::cache::{ArtifactStorage, FsArtifactStore, MODEL_CACHE};
//!
//! let store = FsArtifactStore::new(".geoquery/cache")?;
//! store.put(MODEL_CACHE, "https://hf.co/mlc-ai/Qwen2.5-1.5B/params.bin", 1024).await?;
//! let names = store.resource_names(MODEL_CACHE).await?;
//! # Ok(()) }
//! ```

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const MODEL_CACHE: &str = "webllm/model";
pub const CONFIG_CACHE: &str = "webllm/config";
pub const WASM_CACHE: &str = "webllm/wasm";

/// Every named cache that may hold a model's files.
pub const ALL_CACHES: &[&str] = &[MODEL_CACHE, CONFIG_CACHE, WASM_CACHE];

/// Case-insensitive substring match of a model id against a resource name.
///
/// Models sharing an id prefix can match each other's files.
pub fn resource_matches(resource: &str, model_id: &str) -> bool {
    resource.contains(model_id) || resource.to_lowercase().contains(&model_id.to_lowercase())
}

/// Named caches of resources, the way a browser Cache API exposes them.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn resource_names(&self, cache_name: &str) -> Result<Vec<String>, StorageError>;

    async fn put(&self, cache_name: &str, resource: &str, size_bytes: u64) -> Result<(), StorageError>;

    /// Removes resources whose name matches `model_id`; returns how many went.
    async fn delete_matching(&self, cache_name: &str, model_id: &str) -> Result<usize, StorageError>;
}

/// Stored resource with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub resource: String,
    pub size_bytes: u64,
    /// Seconds since the epoch
    pub timestamp: u64,
}

/// Directory-backed artifact store
pub struct FsArtifactStore {
    root: PathBuf,
    enabled: bool,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| StorageError::WriteError(e.to_string()))?;
        }

        Ok(Self {
            root,
            enabled: true,
        })
    }

    /// A store whose every operation reports `Unavailable`
    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn cache_dir(&self, cache_name: &str) -> PathBuf {
        let dir_name: String = cache_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(dir_name)
    }

    /// Stable entry key for a resource name
    fn entry_key(resource: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, cache_name: &str, resource: &str) -> PathBuf {
        self.cache_dir(cache_name)
            .join(format!("{}.json", Self::entry_key(resource)))
    }

    async fn read_entries(&self, cache_name: &str) -> Result<Vec<(PathBuf, ArtifactEntry)>, StorageError> {
        if !self.enabled {
            return Err(StorageError::Unavailable);
        }

        let dir = self.cache_dir(cache_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<ArtifactEntry>(&content) {
                    Ok(entry) => entries.push((path, entry)),
                    Err(e) => warn!("Skipping corrupt artifact entry {:?}: {}", path, e),
                },
                Err(e) => warn!("Could not read artifact entry {:?}: {}", path, e),
            }
        }
        Ok(entries)
    }

    /// Remove every entry of every named cache
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for cache_name in ALL_CACHES {
            for (path, _) in self.read_entries(cache_name).await? {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StorageError::WriteError(e.to_string()))?;
                removed += 1;
            }
        }
        debug!("Artifact store cleared: {} entries removed", removed);
        Ok(removed)
    }

    /// Entry count and total recorded size of one named cache
    pub async fn stats(&self, cache_name: &str) -> Result<StoreStats, StorageError> {
        let entries = self.read_entries(cache_name).await?;
        Ok(StoreStats {
            total_entries: entries.len(),
            total_size_bytes: entries.iter().map(|(_, e)| e.size_bytes).sum(),
            newest_entry_timestamp: entries.iter().map(|(_, e)| e.timestamp).max(),
        })
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStore {
    async fn resource_names(&self, cache_name: &str) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .read_entries(cache_name)
            .await?
            .into_iter()
            .map(|(_, e)| e.resource)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn put(&self, cache_name: &str, resource: &str, size_bytes: u64) -> Result<(), StorageError> {
        if !self.enabled {
            return Err(StorageError::Unavailable);
        }

        let dir = self.cache_dir(cache_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let entry = ArtifactEntry {
            resource: resource.to_string(),
            size_bytes,
            timestamp,
        };

        let content = serde_json::to_string_pretty(&entry)?;
        tokio::fs::write(self.entry_path(cache_name, resource), content)
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;
        Ok(())
    }

    async fn delete_matching(&self, cache_name: &str, model_id: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        let mut failures = Vec::new();

        for (path, entry) in self.read_entries(cache_name).await? {
            if !resource_matches(&entry.resource, model_id) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => failures.push((path, e)),
            }
        }

        if removed > 0 {
            debug!("Deleted {} entries from {} for {}", removed, cache_name, model_id);
        }

        if !failures.is_empty() {
            for (path, error) in &failures {
                warn!("Failed to remove artifact {:?}: {}", path, error);
            }
            return Err(StorageError::WriteError(format!(
                "{} artifact removals failed in {}",
                failures.len(),
                cache_name
            )));
        }

        Ok(removed)
    }
}

/// Store statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub newest_entry_timestamp: Option<u64>,
}
