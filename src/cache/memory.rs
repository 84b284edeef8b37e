use async_trait::async_trait;
use lru::LruCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CacheBackend, CacheEntry, Clock};
use crate::error::CacheResult;

/// Bounded in-memory tier.
///
/// Recency is tracked by the LRU list: reads promote an entry. When the map is
/// full, expired entries are purged first and only then are the least recently
/// used entries dropped.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    max_size: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create a tier holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            max_size: max_size.max(1),
            default_ttl,
            clock,
        }
    }

    /// Number of physically stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn evict_if_needed(&self, entries: &mut LruCache<String, CacheEntry>) {
        if entries.len() < self.max_size {
            return;
        }

        let now = self.clock.now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }

        let mut evicted = 0usize;
        while entries.len() >= self.max_size {
            if entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        debug!(
            expired = expired.len(),
            evicted = evicted,
            remaining = entries.len(),
            "Memory cache eviction sweep"
        );
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get_entry(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(self.clock.now()),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.get(key).cloned())
    }

    async fn put_entry(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains(key) {
            self.evict_if_needed(&mut entries);
        }
        entries.put(key.to_string(), entry);
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
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde_json::json;

    fn cache(max_size: usize) -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            MemoryCache::new(max_size, Duration::from_secs(60), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_reads() {
        let (cache, _clock) = cache(2);
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();

        // touch "a" so "b" becomes least recently used
        assert_eq!(cache.get("a").await.unwrap(), Some(json!(1)));
        cache.set("c", json!(3), None).await.unwrap();

        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("c").await.unwrap(), Some(json!(3)));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_evicted_before_live_ones() {
        let (cache, clock) = cache(2);
        cache.set("live", json!("l"), Some(Duration::from_secs(600))).await.unwrap();
        cache.set("stale", json!("s"), Some(Duration::from_secs(1))).await.unwrap();
        // "live" is now the LRU entry, but "stale" is expired and must go first
        clock.advance(Duration::from_secs(5));

        cache.set("new", json!("n"), None).await.unwrap();

        assert_eq!(cache.get("live").await.unwrap(), Some(json!("l")));
        assert_eq!(cache.get("new").await.unwrap(), Some(json!("n")));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let (cache, _clock) = cache(2);
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();
        cache.set("a", json!(10), None).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some(json!(10)));
        assert_eq!(cache.get("b").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_expired_entry_purged_on_access() {
        let (cache, clock) = cache(4);
        cache.set("k", json!(true), Some(Duration::from_secs(2))).await.unwrap();
        clock.advance(Duration::from_secs(3));

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_entry_keeps_original_expiry() {
        let (cache, clock) = cache(4);
        let entry = CacheEntry::new(json!("v"), Duration::from_millis(1500), clock.now());
        clock.advance(Duration::from_secs(1));
        cache.put_entry("k", entry).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
        clock.advance(Duration::from_millis(600));
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (cache, _clock) = cache(4);
        cache.set("a", json!(1), None).await.unwrap();
        cache.set("b", json!(2), None).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());

        cache.clear().await.unwrap();
        assert!(!cache.exists("b").await.unwrap());
    }
}
