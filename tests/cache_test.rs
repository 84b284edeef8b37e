//! Integration tests for the tiered cache
//!
//! Exercises the disk tier against a real temporary directory.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use graph_rag_reasoning::cache::{
    cache_key, CacheBackend, Clock, DiskCache, ManualClock, MemoryCache, TieredCache,
};
use graph_rag_reasoning::config::CacheConfig;

const TTL: Duration = Duration::from_secs(60);

fn tiered(dir: &TempDir, clock: Arc<dyn Clock>) -> (TieredCache, Arc<DiskCache>) {
    let disk = Arc::new(DiskCache::new(dir.path(), TTL, clock.clone()).expect("disk tier"));
    let memory: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new(16, TTL, clock));
    let cache = TieredCache::new(Some(memory), Some(disk.clone() as Arc<dyn CacheBackend>))
        .expect("cache");
    (cache, disk)
}

#[cfg(test)]
mod disk_tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_values_survive_a_new_cache_instance() {
        let dir = TempDir::new().unwrap();
        let key = cache_key("kb", &["inflation"]);
        {
            let (cache, _) = tiered(&dir, Arc::new(ManualClock::default()));
            assert!(cache.set(&key, json!(["chunk one"]), None).await);
        }

        let (cache, _) = tiered(&dir, Arc::new(ManualClock::default()));
        assert_eq!(cache.get(&key).await, Some(json!(["chunk one"])));
        assert_eq!(cache.stats().disk_hits, 1);

        // back-filled into memory
        assert_eq!(cache.get(&key).await, Some(json!(["chunk one"])));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_a_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let disk = DiskCache::new(dir.path(), TTL, clock).unwrap();
        let path = disk.path_for("kg:broken");
        std::fs::write(&path, b"{ not json").unwrap();

        let disk: Arc<dyn CacheBackend> = Arc::new(disk);
        let cache = TieredCache::new(None, Some(disk)).unwrap();

        assert_eq!(cache.get("kg:broken").await, None);
        assert!(!path.exists());
        let stats = cache.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let (cache, disk) = tiered(&dir, clock.clone());

        cache
            .set("answer:q", json!("cached"), Some(Duration::from_secs(10)))
            .await;
        clock.advance(Duration::from_secs(5));
        assert!(cache.exists("answer:q").await);

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.get("answer:q").await, None);
        assert!(!disk.path_for("answer:q").exists());
    }

    #[tokio::test]
    async fn test_backfill_keeps_disk_expiry() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let (cache, _) = tiered(&dir, clock.clone());
            cache
                .set("k", json!("v"), Some(Duration::from_secs(10)))
                .await;
        }

        // fresh memory tier, as after a restart
        let (cache, _) = tiered(&dir, clock.clone());
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k").await, Some(json!("v")));
        assert_eq!(cache.stats().disk_hits, 1);

        clock.advance(Duration::from_secs(3));
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.exists("k").await);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = tiered(&dir, Arc::new(ManualClock::default()));

        cache.set("a", json!(1), None).await;
        cache.set("b", json!(2), None).await;
        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);

        assert!(cache.clear().await);
        assert!(!cache.exists("b").await);
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_builds_both_tiers() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            memory_enabled: true,
            disk_enabled: true,
            max_size: 8,
            default_ttl_secs: 60,
            directory: dir.path().join("cache"),
        };

        let cache = TieredCache::from_config(&config).unwrap();
        assert!(cache.set_json("kb:x", &vec!["a".to_string()], None).await);
        assert!(dir.path().join("cache").is_dir());
        assert_eq!(
            cache.get_json::<Vec<String>>("kb:x").await,
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_no_tiers_is_a_config_error() {
        let config = CacheConfig {
            memory_enabled: false,
            disk_enabled: false,
            ..CacheConfig::default()
        };
        assert!(TieredCache::from_config(&config).is_err());
    }
}
