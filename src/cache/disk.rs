use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheBackend, CacheEntry, Clock};
use crate::error::{CacheError, CacheResult};

const EXTENSION: &str = "cache";

/// Disk tier: one JSON file per key, named by the SHA-256 of the key.
pub struct DiskCache {
    directory: PathBuf,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl DiskCache {
    /// Open (creating if needed) a cache directory.
    pub fn new(
        directory: impl AsRef<Path>,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            default_ttl,
            clock,
        })
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory
            .join(format!("{}.{}", hex::encode(digest), EXTENSION))
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get_entry(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                self.remove_quietly(&path).await;
                return Err(CacheError::Io(e));
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %path.display(), "Removing corrupted cache file");
                self.remove_quietly(&path).await;
                return Err(CacheError::Serialization(e));
            }
        };

        if entry.is_expired(self.clock.now()) {
            self.remove_quietly(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put_entry(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        let bytes = serde_json::to_vec(&entry)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(())
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl), self.clock.now());
        self.put_entry(key, entry).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION) {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
