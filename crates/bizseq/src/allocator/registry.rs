use crate::KeyCache;
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// The key map of one allocator instance.
///
/// Lookups of existing keys share a read lock; only insertion of a new key
/// and eviction take the write lock. Per-key state is never touched while a
/// caller holds the map lock except during eviction, which always locks in
/// map-then-key order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    caches: RwLock<HashMap<String, Arc<KeyCache>>>,
}

impl Registry {
    pub fn get(&self, key: &str) -> Option<Arc<KeyCache>> {
        self.caches.read().get(key).cloned()
    }

    /// Inserts `cache` unless another caller got there first, and returns the
    /// cache that ended up in the map.
    pub fn get_or_insert(&self, cache: KeyCache) -> Arc<KeyCache> {
        let mut caches = self.caches.write();
        Arc::clone(
            caches
                .entry(cache.key().to_owned())
                .or_insert_with(|| Arc::new(cache)),
        )
    }

    /// Drops every cache that has been idle for at least `idle`. Returns the
    /// evicted keys.
    pub fn evict_idle(&self, now: Instant, idle: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.caches.write().retain(|key, cache| {
            let keep = !cache.is_evictable(now, idle);
            if !keep {
                evicted.push(key.clone());
            }
            keep
        });
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<Arc<KeyCache>> {
        self.caches.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn clear(&self) {
        self.caches.write().clear();
    }
}
