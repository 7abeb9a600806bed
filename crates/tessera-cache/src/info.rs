//! In-memory source-description cache.
//!
//! Memoizes [`ImageInfo`] by identifier in a bounded LRU so repeat
//! requests skip re-opening the source to learn its geometry. Invalidated
//! only by explicit purge.

use std::collections::HashMap;
use std::sync::Mutex;

use tessera_core::ImageInfo;

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoCacheStats {
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
}

struct Entry {
    info: ImageInfo,
    last_access: u64,
}

struct Inner {
    map: HashMap<String, Entry>,
    tick: u64,
    stats: InfoCacheStats,
}

/// Bounded LRU of source descriptions.
pub struct InfoCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl InfoCache {
    /// Creates a cache holding at most `capacity` descriptions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
                stats: InfoCacheStats::default(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Looks up a description, refreshing its recency.
    pub fn get(&self, identifier: &str) -> Option<ImageInfo> {
        let mut inner = self.inner.lock().expect("info cache lock");
        inner.tick += 1;
        let tick = inner.tick;
        match inner.map.get_mut(identifier) {
            Some(entry) => {
                entry.last_access = tick;
                let info = entry.info.clone();
                inner.stats.hits += 1;
                Some(info)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Stores a description, evicting the least recently used entry when
    /// the cache is full.
    pub fn put(&self, info: ImageInfo) {
        let mut inner = self.inner.lock().expect("info cache lock");
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.insert(info.identifier.clone(), Entry { info, last_access: tick });

        while inner.map.len() > self.capacity {
            let coldest = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match coldest {
                Some(key) => {
                    inner.map.remove(&key);
                    inner.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drops one identifier's description.
    pub fn purge(&self, identifier: &str) {
        self.inner.lock().expect("info cache lock").map.remove(identifier);
    }

    /// Drops everything.
    pub fn purge_all(&self) {
        self.inner.lock().expect("info cache lock").map.clear();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("info cache lock").map.len()
    }

    /// Returns `true` when no descriptions are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> InfoCacheStats {
        self.inner.lock().expect("info cache lock").stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Format;

    fn info(identifier: &str) -> ImageInfo {
        ImageInfo::single_level(identifier, Format::Tiff, 100, 100, 8, 3)
    }

    #[test]
    fn get_after_put() {
        let cache = InfoCache::new(8);
        assert!(cache.get("a").is_none());
        cache.put(info("a"));
        assert_eq!(cache.get("a").expect("hit").identifier, "a");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn lru_eviction_order() {
        let cache = InfoCache::new(2);
        cache.put(info("a"));
        cache.put(info("b"));
        // Touch "a" so "b" is the eviction victim.
        cache.get("a");
        cache.put(info("c"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn purge_is_immediate() {
        let cache = InfoCache::new(8);
        cache.put(info("a"));
        cache.put(info("b"));
        cache.purge("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);

        cache.purge_all();
        assert!(cache.is_empty());
    }
}
