//! Read-through LRU cache
//!
//! Best-effort only: entries can be dropped at any time and must be
//! invalidated after every write to the same key. Entries also expire after
//! `ttl`, which bounds how long a write made by another process stays
//! invisible here. Paths that move money read the store directly.

use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

pub struct Cache<K, V> {
    entries: Mutex<LruCache<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let fresh = entries
            .get(key)
            .map(|(stored_at, value)| (stored_at.elapsed() < self.ttl, value.clone()));
        match fresh {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().put(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value, or load it and cache a `Some` result.
    ///
    /// The lock is not held across the loader, so two callers may both load
    /// on a miss; the later insert wins.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(Some(hit));
        }
        let loaded = load().await?;
        if let Some(ref value) = loaded {
            self.insert(key, value.clone());
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = Cache::new(2, TTL);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_usable() {
        let cache = Cache::new(0, TTL);
        cache.insert(1, "x");
        assert_eq!(cache.get(&1), Some("x"));
    }

    #[test]
    fn test_invalidate() {
        let cache = Cache::new(4, TTL);
        cache.insert(1, 10);
        cache.invalidate(&1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_try_load_caches_hits_only() {
        let cache: Cache<u32, String> = Cache::new(4, TTL);

        let missing: Result<_, ()> = cache.get_or_try_load(1, || async { Ok(None) }).await;
        assert_eq!(missing, Ok(None));
        assert!(cache.is_empty());

        let loaded: Result<_, ()> = cache
            .get_or_try_load(2, || async { Ok(Some("two".to_string())) })
            .await;
        assert_eq!(loaded, Ok(Some("two".to_string())));

        let cached: Result<_, ()> = cache
            .get_or_try_load(2, || async { Ok(Some("reloaded".to_string())) })
            .await;
        assert_eq!(cached, Ok(Some("two".to_string())), "hit must not call the loader");
    }

    #[tokio::test]
    async fn test_get_or_try_load_propagates_errors() {
        let cache: Cache<u32, u32> = Cache::new(4, TTL);
        let result = cache.get_or_try_load(1, || async { Err("down") }).await;
        assert_eq!(result, Err("down"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = Cache::new(4, Duration::from_millis(20));
        cache.insert("tier", 10);
        assert_eq!(cache.get(&"tier"), Some(10));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"tier"), None);
        assert!(cache.is_empty());
    }
}
