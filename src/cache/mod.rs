//! Single-flight LRU cache
//!
//! A bounded in-memory LRU cache of cloneable values keyed by string, plus a
//! per-key lock layer that lets callers coordinate expensive fetches so that
//! at most one of them is in flight for a given key.
//!
//! # Single-flight protocol
//!
//! ```ignore
//! let hit = cache.get_and_lock("buckets").await;
//! if hit.is_none() {
//!     let buckets = list_buckets().await?;
//!     cache.put("buckets", buckets);
//! }
//! cache.unlock("buckets");
//! ```
//!
//! [`SingleFlightCache::get_or_try_fetch`] packages the same sequence and
//! always releases the key lock, including on error.
//!
//! The LRU structure is guarded by one coarse mutex that is never held
//! across an await. Per-key locks are independent async mutexes, created
//! lazily and kept for the lifetime of the cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const NIL: usize = usize::MAX;

struct Node<V> {
    key: String,
    value: V,
    prev: usize,
    next: usize,
}

/// Doubly linked recency list stored in a slab.
///
/// `head` is the most recently used entry, `tail` the least recently used.
struct LruList<V> {
    index: HashMap<String, usize>,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<V: Clone> LruList<V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<V> {
        self.nodes[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("lru slot {slot} is vacant"))
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node_mut(slot);
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.node_mut(old_head).prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.detach(slot);
            self.push_front(slot);
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        Some(self.node_mut(slot).value.clone())
    }

    /// Returns true when the key already existed.
    fn put(&mut self, key: &str, value: V, capacity: usize) -> bool {
        if let Some(&slot) = self.index.get(key) {
            self.node_mut(slot).value = value;
            self.touch(slot);
            return true;
        }

        if self.len() >= capacity {
            self.evict_oldest();
        }

        let node = Node {
            key: key.to_string(),
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key.to_string(), slot);
        self.push_front(slot);
        false
    }

    fn evict_oldest(&mut self) {
        let slot = self.tail;
        if slot == NIL {
            return;
        }
        self.detach(slot);
        if let Some(node) = self.nodes[slot].take() {
            tracing::trace!(key = %node.key, "Evicting least recently used cache entry");
            self.index.remove(&node.key);
        }
        self.free.push(slot);
    }
}

/// Bounded LRU cache with per-key locking for single-flight fetches.
pub struct SingleFlightCache<V> {
    capacity: usize,
    entries: Mutex<LruList<V>>,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl<V: Clone> SingleFlightCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero disables storage: every `put` is dropped and every
    /// `get` misses. Key locking keeps working in that mode.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(LruList::new()),
            key_locks: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace `key`, marking it most recently used.
    ///
    /// Returns whether the key was already present.
    pub fn put(&self, key: &str, value: V) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.entries.lock().put(key, value, self.capacity)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        if self.capacity == 0 {
            return None;
        }
        self.entries.lock().get(key)
    }

    /// Acquire the lock for `key`, waiting until it is free, then look it up.
    ///
    /// The lock stays held until [`SingleFlightCache::unlock`] is called.
    pub async fn get_and_lock(&self, key: &str) -> Option<V> {
        let lock = {
            let mut locks = self.key_locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        self.held.lock().insert(key.to_string(), guard);

        self.get(key)
    }

    /// Release the lock for `key`. Does nothing when the key is not locked.
    pub fn unlock(&self, key: &str) {
        let guard = self.held.lock().remove(key);
        drop(guard);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// Concurrent callers for the same key wait for the first one; only one
    /// of them runs `fetch` as long as it succeeds. Errors are not cached.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let hit = self.get_and_lock(key).await;
        let _unlock = KeyUnlock { cache: self, key };

        if let Some(value) = hit {
            return Ok(value);
        }

        tracing::debug!(key = %key, "Cache miss, fetching");
        let value = fetch().await?;
        self.put(key, value.clone());
        Ok(value)
    }
}

struct KeyUnlock<'a, V: Clone> {
    cache: &'a SingleFlightCache<V>,
    key: &'a str,
}

impl<V: Clone> Drop for KeyUnlock<'_, V> {
    fn drop(&mut self) {
        self.cache.unlock(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_get_on_missing_key() {
        let cache: SingleFlightCache<Vec<String>> = SingleFlightCache::new(5);
        assert_eq!(cache.get("test"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_put_then_get() {
        let cache = SingleFlightCache::new(5);
        assert!(!cache.put("s3", Vec::<String>::new()));
        assert_eq!(cache.get("s3"), Some(vec![]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_overrides_existing_key() {
        let cache = SingleFlightCache::new(5);
        assert!(!cache.put("s3", vec![]));
        assert!(cache.put("s3", vec!["test".to_string()]));
        assert_eq!(cache.get("s3"), Some(vec!["test".to_string()]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = SingleFlightCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_keeps_only_most_recent_keys() {
        let cache = SingleFlightCache::new(5);
        for i in 0..=10 {
            cache.put(&format!("test-{i}"), "value");
        }
        for i in 0..=5 {
            assert_eq!(cache.get(&format!("test-{i}")), None);
        }
        for i in 6..=10 {
            assert_eq!(cache.get(&format!("test-{i}")), Some("value"));
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_repeated_get_returns_same_value() {
        let cache = SingleFlightCache::new(3);
        cache.put("k", "v".to_string());
        for _ in 0..10 {
            assert_eq!(cache.get("k").as_deref(), Some("v"));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_slots_are_reused_after_eviction() {
        let cache = SingleFlightCache::new(1);
        for i in 0..100 {
            cache.put(&i.to_string(), i);
        }
        assert_eq!(cache.entries.lock().nodes.len(), 1);
        assert_eq!(cache.get("99"), Some(99));
    }

    #[test]
    fn test_zero_capacity_disables_storage() {
        let cache = SingleFlightCache::new(0);
        assert!(!cache.put("test", vec!["slice"]));
        assert_eq!(cache.get("test"), None);
        assert!(!cache.put("test", vec![]));
        assert_eq!(cache.get("test"), None);
        assert!(!cache.put("test2", vec![]));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_unlock_without_lock_is_noop() {
        let cache: SingleFlightCache<u8> = SingleFlightCache::new(1);
        cache.unlock("never-locked");
        cache.unlock("never-locked");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_and_lock_misses_only_once() {
        let cache = Arc::new(SingleFlightCache::new(1));
        let misses = Arc::new(AtomicUsize::new(0));
        let key = "sameKeyForMultipleTasks";

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let misses = misses.clone();
            handles.push(tokio::spawn(async move {
                let hit = cache.get_and_lock(key).await;
                if hit.is_none() {
                    misses.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    cache.put(key, "value");
                }
                cache.unlock(key);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.get(key), Some("value"));
        assert_eq!(misses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_try_fetch_does_not_cache_errors() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new(4);

        let failed: Result<u32, &str> = cache.get_or_try_fetch("k", || async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));
        assert_eq!(cache.get("k"), None);

        let fetched: Result<u32, &str> = cache.get_or_try_fetch("k", || async { Ok(7) }).await;
        assert_eq!(fetched, Ok(7));

        let cached: Result<u32, &str> = cache
            .get_or_try_fetch("k", || async { Err("fetched twice") })
            .await;
        assert_eq!(cached, Ok(7));
    }

    #[tokio::test]
    async fn test_lock_released_when_fetch_is_dropped() {
        let cache: Arc<SingleFlightCache<u32>> = Arc::new(SingleFlightCache::new(4));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_try_fetch("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok::<_, ()>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pending.abort();
        let _ = pending.await;

        let value = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_try_fetch("k", || async { Ok::<_, ()>(2) }),
        )
        .await
        .expect("key lock should have been released");
        assert_eq!(value, Ok(2));
        assert_eq!(cache.get("k"), Some(2));
    }
}
