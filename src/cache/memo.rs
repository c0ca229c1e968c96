//! Memoizing decorators.
//!
//! [`LocalMemo`] keeps live values in an [`InProcessCache`]; [`RemoteMemo`]
//! stores `serde_json` payloads through a [`NetworkedCache`]. Both expose the
//! same [`CacheControl`] surface, and [`Memoized`] pairs either one with the
//! function it wraps.

use super::local::{InProcessCache, DEFAULT_LOCAL_CAPACITY, UNBOUNDED_LOCAL_CAPACITY};
use super::policy::{CachePolicy, Capacity};
use super::remote::{NetworkedCache, DEFAULT_REMOTE_CAPACITY};
use crate::config::RemoteTarget;
use crate::key::{hash_key, CacheKey, CallArgs, KeyDeriver, KeyMode, Signature};
use crate::resilience::AvailabilityTracker;
use crate::Error;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime controls shared by every decorator.
///
/// All methods are idempotent and safe to call while calls are in flight.
pub trait CacheControl: Send + Sync {
    /// Identity of the wrapped function.
    fn name(&self) -> &str;
    fn backend_name(&self) -> &'static str;
    fn enable(&self);
    /// No-op (with a notice unless quiet) when disabling is not allowed.
    fn disable(&self, clear_first: bool);
    fn disable_and_clear(&self) {
        self.disable(true)
    }
    fn clear(&self);
    fn set_quiet(&self, quiet: bool);
    fn is_enabled(&self) -> bool;
    fn is_quiet(&self) -> bool;
    fn tags(&self) -> &BTreeSet<String>;
    /// Entry count; never has side effects.
    fn size(&self) -> usize;

    /// True if the filter is empty or shares a tag with this decorator.
    fn matches_tags(&self, filter: &[&str]) -> bool {
        filter.is_empty() || filter.iter().any(|t| self.tags().contains(*t))
    }
}

/// Object-safe call path, so decorators of either backend can sit behind one
/// [`Memoized`].
pub trait Memo<V, E>: CacheControl {
    fn call_memoized(&self, args: &CallArgs, compute: &dyn Fn() -> Result<V, E>) -> Result<V, E>;
}

struct ControlState {
    name: String,
    enabled: AtomicBool,
    quiet: AtomicBool,
    allow_disable: bool,
    tags: BTreeSet<String>,
}

impl ControlState {
    fn new(signature: &Signature, policy: &CachePolicy) -> Self {
        Self {
            name: signature.identity().to_string(),
            enabled: AtomicBool::new(policy.enabled),
            quiet: AtomicBool::new(policy.quiet),
            allow_disable: policy.allow_disable,
            tags: policy.tags.clone(),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Returns false when disabling is refused.
    fn may_disable(&self) -> bool {
        if !self.allow_disable {
            if !self.is_quiet() {
                info!(function = %self.name, "caching cannot be disabled for this function");
            }
            return false;
        }
        true
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    fn log_hit(&self, key: &CacheKey) {
        if self.is_quiet() {
            return;
        }
        match key.canonical() {
            Some(raw) => debug!(function = %self.name, key = %raw, "cache hit"),
            None => debug!(function = %self.name, key = %key, "cache hit"),
        }
    }

    fn log_miss(&self, key: &CacheKey) {
        if !self.is_quiet() {
            debug!(function = %self.name, key = %key, "cache miss");
        }
    }

    fn log_failure(&self, what: &str, err: &dyn std::fmt::Display) {
        if self.is_quiet() {
            debug!(function = %self.name, error = %err, "{}", what);
        } else {
            warn!(function = %self.name, error = %err, "{}", what);
        }
    }
}

/// In-process memoization for one function.
pub struct LocalMemo<V> {
    signature: Signature,
    deriver: KeyDeriver,
    cache: InProcessCache<V>,
    state: ControlState,
}

impl<V: Clone> LocalMemo<V> {
    pub fn new(signature: Signature, policy: &CachePolicy) -> Self {
        let capacity = match policy.capacity {
            None => DEFAULT_LOCAL_CAPACITY,
            Some(Capacity::Bounded(n)) => n,
            Some(Capacity::Unbounded) => UNBOUNDED_LOCAL_CAPACITY,
        };
        Self {
            deriver: policy.key_deriver(),
            cache: InProcessCache::new(capacity).with_single_writer(policy.single_writer),
            state: ControlState::new(&signature, policy),
            signature,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn key_for(&self, args: &CallArgs) -> crate::Result<CacheKey> {
        Ok(self.deriver.derive(&self.signature, args)?)
    }

    /// Whether a call with `args` would currently hit.
    pub fn contains(&self, args: &CallArgs) -> crate::Result<bool> {
        Ok(self.cache.contains(&self.key_for(args)?))
    }

    /// Runs `compute` through the cache.
    ///
    /// Arguments are bound even when caching is disabled, so a mismatched
    /// call always fails the same way.
    pub fn call_with<E, F>(&self, args: &CallArgs, compute: F) -> Result<V, E>
    where
        E: From<Error>,
        F: FnOnce() -> Result<V, E>,
    {
        if !self.state.is_enabled() {
            self.signature.bind(args).map_err(Error::from)?;
            return compute();
        }
        let key = self.key_for(args)?;
        if let Some(v) = self.cache.get(&key) {
            self.state.log_hit(&key);
            return Ok(v);
        }
        self.state.log_miss(&key);
        self.cache.get_or_compute(&key, compute)
    }
}

impl<V: Clone + Send> CacheControl for LocalMemo<V> {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn enable(&self) {
        self.state.enable();
    }

    fn disable(&self, clear_first: bool) {
        if self.state.may_disable() {
            if clear_first {
                self.cache.clear();
            }
            self.state.disable();
        }
    }

    fn clear(&self) {
        self.cache.clear();
    }

    fn set_quiet(&self, quiet: bool) {
        self.state.quiet.store(quiet, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    fn is_quiet(&self) -> bool {
        self.state.is_quiet()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.state.tags
    }

    fn size(&self) -> usize {
        self.cache.len()
    }
}

impl<V: Clone + Send, E: From<Error>> Memo<V, E> for LocalMemo<V> {
    fn call_memoized(&self, args: &CallArgs, compute: &dyn Fn() -> Result<V, E>) -> Result<V, E> {
        self.call_with(args, compute)
    }
}

/// Networked memoization for one function.
///
/// Entries live under `{namespace}:{key}` and are bounded by the namespace's
/// recency index. An unreachable store turns every call into a plain call.
pub struct RemoteMemo<V> {
    signature: Signature,
    deriver: KeyDeriver,
    backend: NetworkedCache,
    namespace: String,
    capacity: Option<usize>,
    ttl: Option<Duration>,
    state: ControlState,
    _value: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> RemoteMemo<V> {
    pub fn new(
        signature: Signature,
        policy: &CachePolicy,
        tracker: Arc<AvailabilityTracker>,
        target: RemoteTarget,
    ) -> Self {
        let namespace = match policy.namespace {
            Some(ref ns) => ns.clone(),
            None => derived_namespace(&signature, policy.key_mode),
        };
        let capacity = match policy.capacity {
            None => Some(DEFAULT_REMOTE_CAPACITY),
            Some(Capacity::Bounded(n)) => Some(n),
            Some(Capacity::Unbounded) => None,
        };
        let backend = NetworkedCache::new(tracker, target);
        backend.set_quiet(policy.quiet);
        Self {
            deriver: policy.key_deriver(),
            backend,
            namespace,
            capacity,
            ttl: policy.ttl,
            state: ControlState::new(&signature, policy),
            signature,
            _value: PhantomData,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn target(&self) -> &RemoteTarget {
        self.backend.target()
    }

    pub fn key_for(&self, args: &CallArgs) -> crate::Result<CacheKey> {
        Ok(self.deriver.derive(&self.signature, args)?)
    }

    pub fn call_with<E, F>(&self, args: &CallArgs, compute: F) -> Result<V, E>
    where
        E: From<Error>,
        F: FnOnce() -> Result<V, E>,
    {
        if !self.state.is_enabled() {
            self.signature.bind(args).map_err(Error::from)?;
            return compute();
        }
        let key = self.key_for(args)?;

        if let Some(bytes) = self.backend.get(&self.namespace, &key) {
            match serde_json::from_slice::<V>(&bytes) {
                Ok(v) => {
                    self.state.log_hit(&key);
                    return Ok(v);
                }
                Err(e) => self.state.log_failure("cached value could not be decoded", &e),
            }
        }
        self.state.log_miss(&key);

        let value = compute()?;
        match serde_json::to_vec(&value) {
            Ok(bytes) => self.store(&key, &bytes),
            Err(e) => self.state.log_failure("result could not be serialized, not caching", &e),
        }
        Ok(value)
    }

    fn store(&self, key: &CacheKey, bytes: &[u8]) {
        if !self.backend.put(&self.namespace, key, bytes, self.ttl) {
            return;
        }
        self.backend.record_recent(&self.namespace, key);
        if let Some(capacity) = self.capacity {
            self.backend
                .evict_oldest_if_over_capacity(&self.namespace, capacity);
        }
    }
}

fn derived_namespace(signature: &Signature, mode: KeyMode) -> String {
    let identity = signature.identity().to_string();
    match mode {
        KeyMode::Hash => hash_key(&identity),
        KeyMode::Compress | KeyMode::Plain => identity,
    }
}

impl<V: Serialize + DeserializeOwned> CacheControl for RemoteMemo<V> {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }

    fn enable(&self) {
        self.state.enable();
    }

    fn disable(&self, clear_first: bool) {
        if self.state.may_disable() {
            if clear_first {
                self.backend.clear_namespace(&self.namespace);
            }
            self.state.disable();
        }
    }

    fn clear(&self) {
        self.backend.clear_namespace(&self.namespace);
    }

    fn set_quiet(&self, quiet: bool) {
        self.state.quiet.store(quiet, Ordering::Relaxed);
        self.backend.set_quiet(quiet);
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    fn is_quiet(&self) -> bool {
        self.state.is_quiet()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.state.tags
    }

    fn size(&self) -> usize {
        self.backend.len(&self.namespace)
    }
}

impl<V: Serialize + DeserializeOwned, E: From<Error>> Memo<V, E> for RemoteMemo<V> {
    fn call_memoized(&self, args: &CallArgs, compute: &dyn Fn() -> Result<V, E>) -> Result<V, E> {
        self.call_with(args, compute)
    }
}

type WrappedFn<V, E> = Box<dyn Fn(&CallArgs) -> Result<V, E> + Send + Sync>;

/// A function together with the decorator that caches it.
///
/// The original function stays reachable through [`Memoized::call_uncached`].
pub struct Memoized<V, E> {
    memo: Arc<dyn Memo<V, E>>,
    func: WrappedFn<V, E>,
}

impl<V, E> Memoized<V, E> {
    pub fn new<F>(memo: Arc<dyn Memo<V, E>>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            memo,
            func: Box::new(func),
        }
    }

    pub fn call(&self, args: &CallArgs) -> Result<V, E> {
        self.memo.call_memoized(args, &|| (self.func)(args))
    }

    pub fn call_uncached(&self, args: &CallArgs) -> Result<V, E> {
        (self.func)(args)
    }

    pub fn memo(&self) -> &Arc<dyn Memo<V, E>> {
        &self.memo
    }
}

impl<V, E> std::fmt::Debug for Memoized<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("function", &self.memo.name())
            .field("backend", &self.memo.backend_name())
            .field("enabled", &self.memo.is_enabled())
            .finish()
    }
}
