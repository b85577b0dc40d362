//! In-process LRU tier.

use super::key::CacheKey;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

/// Capacity-bounded LRU map guarded by one mutex.
///
/// `get` refreshes recency; inserting a new key at capacity evicts the least
/// recently used entry; re-inserting an existing key updates it in place and
/// refreshes its recency.
pub struct SoftCache {
    entries: Mutex<LruCache<String, Value>>,
    capacity: usize,
}

impl SoftCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.lock().get(key.as_str()).cloned()
    }

    /// Insert or refresh; returns the evicted key, if any.
    pub fn put(&self, key: &CacheKey, value: Value) -> Option<String> {
        self.lock()
            .push(key.as_str().to_string(), value)
            .and_then(|(evicted, _)| (evicted != key.as_str()).then_some(evicted))
    }

    /// Presence check without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn k(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = SoftCache::new(2);
        assert_eq!(cache.put(&k("a"), json!(1)), None);
        assert_eq!(cache.put(&k("b"), json!(2)), None);
        assert_eq!(cache.put(&k("c"), json!(3)), Some("a".to_string()));
        assert!(!cache.contains(&k("a")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_and_update_refresh_recency() {
        let cache = SoftCache::new(2);
        cache.put(&k("a"), json!(1));
        cache.put(&k("b"), json!(2));
        assert_eq!(cache.get(&k("a")), Some(json!(1)));
        cache.put(&k("c"), json!(3));
        assert!(cache.contains(&k("a")));
        assert!(!cache.contains(&k("b")));

        // updating "a" moves it to the front; "c" becomes the eviction candidate
        assert_eq!(cache.put(&k("a"), json!(10)), None);
        cache.put(&k("d"), json!(4));
        assert_eq!(cache.get(&k("a")), Some(json!(10)));
        assert!(!cache.contains(&k("c")));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = SoftCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(&k("a"), json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
