// Bounded TTL cache used by the schema catalog
//
// LRU eviction when full, TTL-based expiration, hit/miss statistics.
// Lookups take the shared lock; only inserts, evictions and expirations
// take the exclusive one.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cached value with metadata
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    /// Logical clock of the last access, for LRU ordering
    last_access: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
    clock: AtomicU64,
    counters: Counters,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a cache holding at most `max_size` entries, each living `ttl`
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl,
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        entry.cached_at.elapsed() > self.ttl
    }

    /// Get a live entry; expired entries are removed and count as misses
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if !self.is_expired(entry) => {
                    entry.last_access.store(self.tick(), Ordering::Relaxed);
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Cache hit for key: {:?}", key);
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.write();
            if entries.get(key).is_some_and(|e| self.is_expired(e)) {
                entries.remove(key);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache expired for key: {:?}", key);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache miss for key: {:?}", key);
        None
    }

    /// Store a value, evicting the least recently used entry when full
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.write();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Evicted cache entry: {:?}", oldest);
            }
        }

        let entry = CacheEntry {
            value,
            cached_at: Instant::now(),
            last_access: AtomicU64::new(self.tick()),
        };
        entries.insert(key, entry);
        tracing::debug!("Cached entry (cache size: {})", entries.len());
    }

    pub fn remove(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    /// Drop every entry whose key does not satisfy `keep`; returns how many went
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|k, _| keep(k));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| e.cached_at.elapsed() <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }
}

/// Stable identity of a data source, derived from its connection string
pub fn data_source_key(data_source: &str) -> String {
    let mut hasher = DefaultHasher::new();
    data_source.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_ms: u64) -> TtlCache<String, u32> {
        TtlCache::new(max_size, Duration::from_millis(ttl_ms))
    }

    #[test]
    fn test_data_source_key() {
        let key1 = data_source_key("mysql://a@host/db");
        let key2 = data_source_key("mysql://a@host/db");
        let key3 = data_source_key("mysql://b@host/db");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_eq!(key1.len(), 16);
    }

    #[test]
    fn test_insert_and_get() {
        let cache = cache(10, 60_000);
        cache.insert("user".to_string(), 1);
        assert_eq!(cache.get(&"user".to_string()), Some(1));
        assert_eq!(cache.get(&"nobody".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiration() {
        let cache = cache(10, 50);
        cache.insert("k".to_string(), 1);
        assert!(cache.get(&"k".to_string()).is_some());

        std::thread::sleep(Duration::from_millis(80));

        assert!(cache.get(&"k".to_string()).is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_stats() {
        let cache = cache(10, 60_000);
        cache.insert("k".to_string(), 1);

        cache.get(&"k".to_string()); // hit
        cache.get(&"k".to_string()); // hit
        cache.get(&"x".to_string()); // miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_ratio() > 0.6);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(3, 60_000);
        cache.insert("k1".to_string(), 1);
        cache.insert("k2".to_string(), 2);
        cache.insert("k3".to_string(), 3);

        // touch k1 so k2 becomes the least recently used
        assert!(cache.get(&"k1".to_string()).is_some());
        cache.insert("k4".to_string(), 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&"k2".to_string()).is_none());
        assert!(cache.get(&"k1".to_string()).is_some());
        assert!(cache.get(&"k4".to_string()).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_remove_and_retain() {
        let cache = cache(10, 60_000);
        cache.insert("a:1".to_string(), 1);
        cache.insert("a:2".to_string(), 2);
        cache.insert("b:1".to_string(), 3);

        assert!(cache.remove(&"a:1".to_string()));
        assert!(!cache.remove(&"a:1".to_string()));
        assert_eq!(cache.retain(|k| !k.starts_with("a:")), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = cache(10, 30);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.stats().expirations, 2);
    }
}
