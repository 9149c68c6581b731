//! Bounded retrieval cache keyed by query hash
//!
//! Entries map the SHA-256 of the raw query to the chunk list retrieved for
//! it. Eviction follows insertion order. Entries are never invalidated when
//! the underlying index changes, so a cached list can go stale after a bulk
//! load until it is evicted.

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Vec<String>>,
    order: VecDeque<String>,
}

/// Insertion-ordered query cache
pub struct QueryCache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key: hex SHA-256 of the query exactly as received
    pub fn key(query: &str) -> String {
        hex::encode(Sha256::digest(query.as_bytes()))
    }

    pub fn get(&self, query: &str) -> Option<Vec<String>> {
        let key = Self::key(query);
        let found = self.entries.lock().map.get(&key).cloned();
        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit: {}", &key[..12]);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache miss: {}", &key[..12]);
            }
        }
        found
    }

    /// Store a value, evicting the oldest insertion when full
    pub fn insert(&self, query: &str, chunks: Vec<String>) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(query);
        let mut entries = self.entries.lock();

        if entries.map.contains_key(&key) {
            entries.map.insert(key, chunks);
            return;
        }
        if entries.map.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.map.remove(&oldest);
                tracing::debug!("Evicted cache entry: {}", &oldest[..12]);
            }
        }
        entries.order.push_back(key.clone());
        entries.map.insert(key, chunks);
    }

    /// Return the cached chunks for `query`, or compute and store them
    ///
    /// `compute` runs outside the lock, so two concurrent misses on the same
    /// query may both compute; the later insert wins.
    pub fn get_or_compute<F>(&self, query: &str, compute: F) -> Vec<String>
    where
        F: FnOnce() -> Vec<String>,
    {
        if let Some(hit) = self.get(query) {
            return hit;
        }
        let chunks = compute();
        self.insert(query, chunks.clone());
        chunks
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries.lock().map.contains_key(&Self::key(query))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.map.clear();
        entries.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_skips_compute() {
        let cache = QueryCache::new(4);
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            vec!["chunk".to_string()]
        };

        assert_eq!(cache.get_or_compute("q", compute), vec!["chunk"]);
        assert_eq!(
            cache.get_or_compute("q", || unreachable!("cached")),
            vec!["chunk"]
        );
        assert_eq!(calls.get(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_key_is_exact_query() {
        assert_ne!(QueryCache::key("Hello"), QueryCache::key("hello"));
        assert_eq!(QueryCache::key("abc").len(), 64);
    }

    #[test]
    fn test_empty_result_is_cached() {
        let cache = QueryCache::new(2);
        assert!(cache.get_or_compute("nothing", Vec::new).is_empty());
        assert!(cache.contains("nothing"));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = QueryCache::new(0);
        cache.get_or_compute("q", || vec!["a".into()]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let cache = QueryCache::new(2);
        cache.insert("a", vec![]);
        cache.insert("b", vec![]);
        cache.insert("a", vec!["new".into()]);
        cache.insert("c", vec![]);

        // "a" was inserted first, so it goes first
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    proptest! {
        #[test]
        fn prop_oldest_evicted_at_capacity(capacity in 1usize..20) {
            let cache = QueryCache::new(capacity);
            for i in 0..=capacity {
                cache.get_or_compute(&format!("query-{}", i), || vec![i.to_string()]);
            }

            prop_assert_eq!(cache.len(), capacity);
            prop_assert!(!cache.contains("query-0"));
            for i in 1..=capacity {
                let query = format!("query-{}", i);
                prop_assert!(cache.contains(&query));
            }
        }
    }
}
