//! Networked backend with emulated bounded-size eviction.
//!
//! The store has no notion of a size cap, so each namespace keeps a recency
//! index (a list at `{namespace}:keys`) with the newest store key at the head.
//! After an insert pushes the index past its capacity, the tail entry is
//! popped and its value deleted. Eviction follows insertion order: a hit does
//! not move a key back to the head.
//!
//! The push and the trim are separate round trips. Concurrent misses can
//! leave the index briefly over capacity; every later insert trims one entry.

use super::store::KvStore;
use crate::config::RemoteTarget;
use crate::key::CacheKey;
use crate::resilience::AvailabilityTracker;
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REMOTE_CAPACITY: usize = 1000;

pub fn value_key(namespace: &str, key: &CacheKey) -> String {
    format!("{}:{}", namespace, key)
}

pub fn index_key(namespace: &str) -> String {
    format!("{}:keys", namespace)
}

/// Result store plus recency index, reached through an [`AvailabilityTracker`].
///
/// Every operation degrades to a miss (reads) or a skipped write when no
/// connection is available or a command fails; callers never see the error.
pub struct NetworkedCache {
    tracker: Arc<AvailabilityTracker>,
    target: RemoteTarget,
    quiet: AtomicBool,
}

impl NetworkedCache {
    pub fn new(tracker: Arc<AvailabilityTracker>, target: RemoteTarget) -> Self {
        Self {
            tracker,
            target,
            quiet: AtomicBool::new(true),
        }
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.store().is_some()
    }

    fn store(&self) -> Option<Arc<dyn KvStore>> {
        let store = self.tracker.connection(&self.target.name, &self.target.params);
        if store.is_none() {
            debug!(connection = %self.target.name, "no cache connection, bypassing store");
        }
        store
    }

    fn degrade(&self, op: &str, err: Error) {
        if self.quiet.load(Ordering::Relaxed) {
            debug!(connection = %self.target.name, op, error = %err, "cache command failed");
        } else {
            warn!(connection = %self.target.name, op, error = %err, "cache command failed");
        }
        if err.is_backend_failure() {
            self.tracker.report_failure(&self.target.name);
        }
    }

    pub fn get(&self, namespace: &str, key: &CacheKey) -> Option<Vec<u8>> {
        let store = self.store()?;
        match store.get(&value_key(namespace, key)) {
            Ok(v) => v,
            Err(e) => {
                self.degrade("get", e);
                None
            }
        }
    }

    /// Returns whether the value was written.
    pub fn put(&self, namespace: &str, key: &CacheKey, value: &[u8], ttl: Option<Duration>) -> bool {
        let Some(store) = self.store() else {
            return false;
        };
        match store.set(&value_key(namespace, key), value, ttl) {
            Ok(()) => true,
            Err(e) => {
                self.degrade("put", e);
                false
            }
        }
    }

    /// Moves the key to the head of the namespace's recency index.
    ///
    /// Older copies are removed first, so a key re-stored after expiry holds
    /// a single slot and a trim can never delete its fresh value.
    pub fn record_recent(&self, namespace: &str, key: &CacheKey) {
        let Some(store) = self.store() else {
            return;
        };
        let index = index_key(namespace);
        let stored = value_key(namespace, key);
        if let Err(e) = store.lrem(&index, &stored) {
            self.degrade("lrem", e);
            return;
        }
        if let Err(e) = store.lpush(&index, &stored) {
            self.degrade("record_recent", e);
        }
    }

    /// Evicts the oldest inserted entry if the index is over `capacity`.
    ///
    /// Removes at most one entry per call. Returns the evicted store key.
    pub fn evict_oldest_if_over_capacity(&self, namespace: &str, capacity: usize) -> Option<String> {
        let store = self.store()?;
        let index = index_key(namespace);
        let len = match store.llen(&index) {
            Ok(n) => n,
            Err(e) => {
                self.degrade("llen", e);
                return None;
            }
        };
        if len <= capacity {
            return None;
        }
        let oldest = match store.rpop(&index) {
            Ok(Some(k)) => k,
            Ok(None) => return None,
            Err(e) => {
                self.degrade("rpop", e);
                return None;
            }
        };
        if let Err(e) = store.del(std::slice::from_ref(&oldest)) {
            self.degrade("del", e);
        }
        debug!(namespace, evicted = %oldest, "evicted oldest cache entry");
        Some(oldest)
    }

    /// Deletes every indexed value of the namespace, then the index itself.
    ///
    /// Keys that already expired are skipped silently.
    pub fn clear_namespace(&self, namespace: &str) {
        let Some(store) = self.store() else {
            return;
        };
        let index = index_key(namespace);
        let keys = match store.lrange_all(&index) {
            Ok(keys) => keys,
            Err(e) => {
                self.degrade("lrange", e);
                return;
            }
        };
        for key in &keys {
            if let Err(e) = store.del(std::slice::from_ref(key)) {
                self.degrade("del", e);
                return;
            }
        }
        if let Err(e) = store.del(&[index]) {
            self.degrade("del", e);
        }
        debug!(namespace, removed = keys.len(), "cleared cache namespace");
    }

    /// Length of the namespace's recency index; 0 when unreachable.
    ///
    /// Only an already open connection is used. Introspection never connects
    /// and never reports failures to the tracker.
    pub fn len(&self, namespace: &str) -> usize {
        let Some(store) = self.tracker.cached(&self.target.name) else {
            return 0;
        };
        match store.llen(&index_key(namespace)) {
            Ok(n) => n,
            Err(e) => {
                debug!(connection = %self.target.name, error = %e, "cache size unavailable");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::key::{CallArgs, FunctionIdentity, KeyDeriver, Signature};
    use crate::resilience::StaticConnector;

    fn key(n: i64) -> CacheKey {
        let sig = Signature::new(FunctionIdentity::new("t.rs", "f")).param("n");
        KeyDeriver::new().derive(&sig, &CallArgs::new().arg(n)).unwrap()
    }

    fn backend() -> (Arc<MemoryStore>, Arc<AvailabilityTracker>, NetworkedCache) {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(AvailabilityTracker::new(Arc::new(StaticConnector::new(
            store.clone(),
        ))));
        let cache = NetworkedCache::new(tracker.clone(), RemoteTarget::default());
        (store, tracker, cache)
    }

    fn insert(cache: &NetworkedCache, ns: &str, n: i64, capacity: usize) -> Option<String> {
        assert!(cache.put(ns, &key(n), &n.to_le_bytes(), None));
        cache.record_recent(ns, &key(n));
        cache.evict_oldest_if_over_capacity(ns, capacity)
    }

    #[test]
    fn test_put_get() {
        let (store, _, cache) = backend();
        assert!(cache.get("ns", &key(1)).is_none());
        assert!(cache.put("ns", &key(1), b"one", None));
        assert_eq!(cache.get("ns", &key(1)), Some(b"one".to_vec()));
        assert!(store.contains(&value_key("ns", &key(1))));
    }

    #[test]
    fn test_eviction_follows_insertion_order() {
        let (store, _, cache) = backend();
        for n in 0..3 {
            assert!(insert(&cache, "ns", n, 3).is_none());
        }
        // Reading the oldest entry does not protect it.
        assert!(cache.get("ns", &key(0)).is_some());

        let evicted = insert(&cache, "ns", 3, 3);
        assert_eq!(evicted, Some(value_key("ns", &key(0))));
        assert!(cache.get("ns", &key(0)).is_none());
        for n in 1..4 {
            assert!(cache.get("ns", &key(n)).is_some());
        }
        assert_eq!(cache.len("ns"), 3);
        assert!(!store.contains(&value_key("ns", &key(0))));
    }

    #[test]
    fn test_namespaces_are_independent() {
        let (_, _, cache) = backend();
        insert(&cache, "a", 1, 1);
        insert(&cache, "b", 2, 1);
        assert_eq!(cache.len("a"), 1);
        assert_eq!(cache.len("b"), 1);
        assert!(cache.get("a", &key(1)).is_some());
    }

    #[test]
    fn test_overshoot_is_trimmed_one_per_call() {
        let (_, _, cache) = backend();
        for n in 0..4 {
            cache.put("ns", &key(n), b"v", None);
            cache.record_recent("ns", &key(n));
        }
        assert_eq!(cache.len("ns"), 4);
        assert!(cache.evict_oldest_if_over_capacity("ns", 2).is_some());
        assert_eq!(cache.len("ns"), 3);
        assert!(cache.evict_oldest_if_over_capacity("ns", 2).is_some());
        assert!(cache.evict_oldest_if_over_capacity("ns", 2).is_none());
        assert_eq!(cache.len("ns"), 2);
    }

    #[test]
    fn test_clear_namespace_tolerates_expired_keys() {
        let (store, _, cache) = backend();
        cache.put("ns", &key(1), b"short", Some(Duration::from_millis(20)));
        cache.record_recent("ns", &key(1));
        insert(&cache, "ns", 2, 10);
        insert(&cache, "other", 3, 10);
        std::thread::sleep(Duration::from_millis(40));

        cache.clear_namespace("ns");
        assert_eq!(cache.len("ns"), 0);
        assert!(cache.get("ns", &key(2)).is_none());
        assert!(!store.contains(&index_key("ns")));
        assert!(cache.get("other", &key(3)).is_some());
    }

    #[test]
    fn test_restored_key_holds_one_index_slot() {
        let (store, _, cache) = backend();
        cache.put("ns", &key(1), b"short", Some(Duration::from_millis(20)));
        cache.record_recent("ns", &key(1));
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("ns", &key(1)).is_none());
        insert(&cache, "ns", 1, 2);
        assert_eq!(
            store.lrange_all(&index_key("ns")).unwrap(),
            vec![value_key("ns", &key(1))]
        );
        assert!(insert(&cache, "ns", 2, 2).is_none());
        assert!(cache.get("ns", &key(1)).is_some());
        assert_eq!(cache.len("ns"), 2);
    }

    #[test]
    fn test_len_does_not_connect() {
        let (_, tracker, cache) = backend();
        assert_eq!(cache.len("ns"), 0);
        assert!(tracker.cached(&cache.target().name).is_none());
        insert(&cache, "ns", 1, 10);
        assert_eq!(cache.len("ns"), 1);
    }

    #[test]
    fn test_outage_degrades_to_misses() {
        let (store, tracker, cache) = backend();
        insert(&cache, "ns", 1, 10);
        store.set_offline(true);

        assert!(cache.get("ns", &key(1)).is_none());
        assert!(!tracker.is_available());
        assert!(!cache.put("ns", &key(2), b"v", None));
        cache.record_recent("ns", &key(2));
        cache.clear_namespace("ns");
        assert_eq!(cache.len("ns"), 0);
        assert!(cache.evict_oldest_if_over_capacity("ns", 0).is_none());

        store.set_offline(false);
        // Still inside the retry interval: the store is not consulted.
        assert!(cache.get("ns", &key(1)).is_none());
        assert!(!cache.is_connected());
    }
}
