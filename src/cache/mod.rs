//! Tiered memory/disk cache with TTL expiry.
//!
//! Every retrieval and LLM boundary call goes through [`TieredCache`]. The
//! cache is never load-bearing for correctness: tier failures are counted and
//! degrade to a miss (reads) or a no-op (writes).

mod disk;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use disk::DiskCache;
pub use memory::MemoryCache;

use crate::config::CacheConfig;
use crate::error::{AppError, AppResult, CacheResult};

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            base: start,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + ChronoDuration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Stored record: `{value, ttl_ms, created_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// New entry created at `now`.
    pub fn new(value: serde_json::Value, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            created_at: now,
        }
    }

    /// Instant after which the entry is logically absent.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(ChronoDuration::milliseconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Logically absent once `now > created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// One cache tier.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a live entry with its original `created_at` and TTL.
    async fn get_entry(&self, key: &str) -> CacheResult<Option<CacheEntry>>;
    /// Read a live value.
    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value))
    }
    /// Store an entry as is, keeping its `created_at` and TTL.
    async fn put_entry(&self, key: &str, entry: CacheEntry) -> CacheResult<()>;
    /// Store a value; `None` uses the tier's default TTL.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>)
        -> CacheResult<()>;
    /// Remove a key, reporting whether it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
    /// Drop every entry.
    async fn clear(&self) -> CacheResult<()>;
    /// Whether a live entry exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;
}

/// Counters exposed by [`TieredCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Memory-first cache facade with disk fall-through and write-through sets.
#[derive(Clone)]
pub struct TieredCache {
    memory: Option<Arc<dyn CacheBackend>>,
    disk: Option<Arc<dyn CacheBackend>>,
    counters: Arc<Counters>,
}

impl TieredCache {
    /// Compose tiers. At least one must be present.
    pub fn new(
        memory: Option<Arc<dyn CacheBackend>>,
        disk: Option<Arc<dyn CacheBackend>>,
    ) -> AppResult<Self> {
        if memory.is_none() && disk.is_none() {
            return Err(AppError::Config {
                message: "at least one cache tier must be enabled".to_string(),
            });
        }
        Ok(Self {
            memory,
            disk,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Build the tiers described by `config` on the system clock.
    pub fn from_config(config: &CacheConfig) -> AppResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ttl = Duration::from_secs(config.default_ttl_secs);

        let memory = config.memory_enabled.then(|| {
            Arc::new(MemoryCache::new(config.max_size, ttl, clock.clone())) as Arc<dyn CacheBackend>
        });
        let disk = if config.disk_enabled {
            let disk = DiskCache::new(&config.directory, ttl, clock)?;
            Some(Arc::new(disk) as Arc<dyn CacheBackend>)
        } else {
            None
        };

        Self::new(memory, disk)
    }

    /// Memory-only cache, mostly for tests and one-off CLI runs.
    pub fn in_memory(max_size: usize, ttl: Duration) -> Self {
        let memory: Arc<dyn CacheBackend> =
            Arc::new(MemoryCache::new(max_size, ttl, Arc::new(SystemClock)));
        Self {
            memory: Some(memory),
            disk: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Read memory, then disk. A disk hit is back-filled into memory with its
    /// original expiry, so it never outlives the disk entry.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(memory) = &self.memory {
            match memory.get(key).await {
                Ok(Some(value)) => {
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.record_error("get", key, &e),
            }
        }

        if let Some(disk) = &self.disk {
            match disk.get_entry(key).await {
                Ok(Some(entry)) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    if let Some(memory) = &self.memory {
                        if let Err(e) = memory.put_entry(key, entry.clone()).await {
                            self.record_error("backfill", key, &e);
                        }
                    }
                    return Some(entry.value);
                }
                Ok(None) => {}
                Err(e) => self.record_error("get", key, &e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write to every tier. Returns false if any tier failed.
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> bool {
        let mut ok = true;
        for tier in self.tiers() {
            if let Err(e) = tier.set(key, value.clone(), ttl).await {
                self.record_error("set", key, &e);
                ok = false;
            }
        }
        ok
    }

    /// Remove from every tier. Returns true if any tier held the key.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        for tier in self.tiers() {
            match tier.delete(key).await {
                Ok(found) => removed |= found,
                Err(e) => self.record_error("delete", key, &e),
            }
        }
        removed
    }

    /// Clear every tier.
    pub async fn clear(&self) -> bool {
        let mut ok = true;
        for tier in self.tiers() {
            if let Err(e) = tier.clear().await {
                self.record_error("clear", "*", &e);
                ok = false;
            }
        }
        ok
    }

    /// Whether any tier holds a live entry.
    pub async fn exists(&self, key: &str) -> bool {
        for tier in self.tiers() {
            match tier.exists(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => self.record_error("exists", key, &e),
            }
        }
        false
    }

    /// Typed read. A value that no longer deserializes counts as an error and a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                self.record_error("decode", key, &e);
                None
            }
        }
    }

    /// Typed write.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl).await,
            Err(e) => {
                self.record_error("encode", key, &e);
                false
            }
        }
    }

    /// Snapshot of the hit/miss/error counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn tiers(&self) -> impl Iterator<Item = &Arc<dyn CacheBackend>> {
        self.memory.iter().chain(self.disk.iter())
    }

    fn record_error(&self, operation: &str, key: &str, error: &dyn std::fmt::Display) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(operation = operation, key = %key, error = %error, "Cache operation failed");
    }
}

/// Build a cache key: `namespace:` followed by the SHA-256 hex of the parts.
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let key = format!("{}:{}", namespace, hex::encode(hasher.finalize()));
    debug!(key = %key, "Built cache key");
    key
}
