//! In-memory TTL caches used by the read-path assembler.
//!
//! Each tier is a map behind its own lock. Reads check the TTL and either
//! return a clone of the cached value or signal a miss; callers recompute
//! without holding the lock and reinsert afterwards. Eviction is purely
//! lazy — expired entries are dropped only when looked up again or
//! overwritten.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

/// A generic `key -> (timestamp, value)` cache with a fixed TTL.
pub struct TtlCache<V: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        let (at, value) = entries.get(key)?;
        if at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.lock().insert(key.into(), (Instant::now(), value));
    }
}

/// The home endpoint's cache entry: the composed response object plus its
/// three precomputed body representations, all behind one lock so they are
/// never observed out of sync with each other (§9 design note).
#[derive(Clone)]
pub struct HomeCacheEntry {
    pub object: Value,
    pub raw: std::sync::Arc<Vec<u8>>,
    pub gzip: std::sync::Arc<Vec<u8>>,
    pub brotli: Option<std::sync::Arc<Vec<u8>>>,
}

pub const HOME_TTL: Duration = Duration::from_secs(90 * 60);
pub const TRENDING_TTL: Duration = Duration::from_secs(90 * 60);
pub const SIMILAR_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);
pub const LOGO_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// The full set of cache tiers the assembler and HTTP surface share.
pub struct Caches {
    pub home: TtlCache<HomeCacheEntry>,
    pub trending: TtlCache<Value>,
    pub similar: TtlCache<Value>,
    pub logo_pick: TtlCache<Option<String>>,
}

impl Default for Caches {
    fn default() -> Self {
        Self {
            home: TtlCache::new(HOME_TTL),
            trending: TtlCache::new(TRENDING_TTL),
            similar: TtlCache::new(SIMILAR_TTL),
            logo_pick: TtlCache::new(LOGO_TTL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_cache() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn hit_within_ttl() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 42);
        assert_eq!(cache.get("a"), Some(42));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_millis(1));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn overwrite_resets_timestamp() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_millis(50));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("a", 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("a"), Some(2));
    }

    #[test]
    fn home_cache_entry_carries_all_representations() {
        let caches = Caches::default();
        let entry = HomeCacheEntry {
            object: Value::Null,
            raw: std::sync::Arc::new(vec![1, 2, 3]),
            gzip: std::sync::Arc::new(vec![4, 5]),
            brotli: None,
        };
        caches.home.insert("en", entry);
        let got = caches.home.get("en").unwrap();
        assert_eq!(*got.raw, vec![1, 2, 3]);
        assert!(got.brotli.is_none());
    }
}
