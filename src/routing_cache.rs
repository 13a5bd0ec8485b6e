//! In-memory routing cache (spec §4.F): remembers the routing key
//! (author id) a document was last indexed under, so later updates to
//! the same document can address it without a prior Mget round trip.
//!
//! A disabled cache (`RoutingCache::disabled()`) is nil-safe: every
//! operation behaves as a miss, never panics, never grows (spec §4.E,
//! §8 "nil receiver behaves as miss for all operations").

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub struct RoutingCache {
    inner: Mutex<Option<LruCache<String, String>>>,
}

impl RoutingCache {
    pub fn new(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(LruCache::new);
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// A cache with no backing store: every `get` misses, every `put`
    /// is a no-op.
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().as_mut()?.get(key).cloned()
    }

    pub fn put(&self, key: String, routing: String) {
        if let Some(cache) = self.inner.lock().unwrap().as_mut() {
            cache.put(key, routing);
        }
    }

    pub fn bulk_get(&self, keys: &[String]) -> Vec<Option<String>> {
        let mut guard = self.inner.lock().unwrap();
        let Some(cache) = guard.as_mut() else {
            return keys.iter().map(|_| None).collect();
        };
        keys.iter().map(|k| cache.get(k).cloned()).collect()
    }

    pub fn bulk_put(&self, entries: Vec<(String, String)>) {
        let mut guard = self.inner.lock().unwrap();
        let Some(cache) = guard.as_mut() else { return };
        for (key, routing) in entries {
            cache.put(key, routing);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().as_ref().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_routing_key() {
        let cache = RoutingCache::new(2);
        cache.put("uri1".to_string(), "author1".to_string());
        assert_eq!(cache.get("uri1"), Some("author1".to_string()));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn evicts_least_recently_used_entry() {
        let cache = RoutingCache::new(2);
        cache.put("a".to_string(), "ra".to_string());
        cache.put("b".to_string(), "rb".to_string());
        cache.get("a");
        cache.put("c".to_string(), "rc".to_string());
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("ra".to_string()));
        assert_eq!(cache.get("c"), Some("rc".to_string()));
    }

    #[test]
    fn bulk_get_preserves_order_with_misses() {
        let cache = RoutingCache::new(10);
        cache.put("x".to_string(), "rx".to_string());
        let results = cache.bulk_get(&["x".to_string(), "y".to_string()]);
        assert_eq!(results, vec![Some("rx".to_string()), None]);
    }

    #[test]
    fn zero_capacity_constructs_a_disabled_cache() {
        let cache = RoutingCache::new(0);
        cache.put("a".to_string(), "ra".to_string());
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_is_nil_safe_across_every_operation() {
        let cache = RoutingCache::disabled();
        cache.put("a".to_string(), "ra".to_string());
        assert_eq!(cache.get("a"), None);

        cache.bulk_put(vec![("b".to_string(), "rb".to_string())]);
        assert_eq!(cache.bulk_get(&["a".to_string(), "b".to_string()]), vec![None, None]);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }
}
