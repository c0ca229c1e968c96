//! In-process LRU backend.

use crate::key::CacheKey;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_LOCAL_CAPACITY: usize = 128;
/// Stand-in for "unbounded" so worst-case memory stays finite.
pub const UNBOUNDED_LOCAL_CAPACITY: usize = 1_000_000;

/// Bounded, access-ordered map from key to live value.
///
/// The mutex only guards the container itself; it is never held while a
/// value is computed, so two threads missing on the same key may both run
/// the computation. Enable `single_writer` to serialise computations.
pub struct InProcessCache<V> {
    entries: Mutex<LruCache<CacheKey, V>>,
    writer: Option<Mutex<()>>,
}

impl<V: Clone> InProcessCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        // Grow on demand instead of reserving the full capacity up front.
        let mut entries = LruCache::unbounded();
        entries.resize(capacity);
        Self {
            entries: Mutex::new(entries),
            writer: None,
        }
    }

    pub fn with_single_writer(mut self, enabled: bool) -> Self {
        self.writer = enabled.then(|| Mutex::new(()));
        self
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.entries().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, value: V) {
        self.entries().put(key, value);
    }

    /// Returns the cached value or runs `compute` once and stores its result.
    ///
    /// Errors from `compute` are returned as-is and nothing is stored.
    pub fn get_or_compute<E, F>(&self, key: &CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let writer = self
            .writer
            .as_ref()
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner));
        if writer.is_some() {
            if let Some(v) = self.get(key) {
                return Ok(v);
            }
        }
        let value = compute()?;
        self.put(key.clone(), value.clone());
        Ok(value)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries().contains(key)
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }
}
