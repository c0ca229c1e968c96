//! Per-decorator caching policy.

use crate::key::{ArgTransform, KeyDeriver, KeyMode, TransformTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Entry bound for one decorated function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl From<Option<usize>> for Capacity {
    fn from(v: Option<usize>) -> Self {
        v.map(Capacity::Bounded).unwrap_or(Capacity::Unbounded)
    }
}

impl From<Capacity> for Option<usize> {
    fn from(c: Capacity) -> Self {
        match c {
            Capacity::Bounded(n) => Some(n),
            Capacity::Unbounded => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// `None` picks the backend's default.
    pub capacity: Option<Capacity>,
    pub enabled: bool,
    pub quiet: bool,
    /// Networked backend only.
    pub ttl: Option<Duration>,
    pub transforms: TransformTable,
    pub tags: BTreeSet<String>,
    pub bind_caller_identity: bool,
    pub allow_disable: bool,
    pub key_mode: KeyMode,
    /// Derived from the function identity when unset.
    pub namespace: Option<String>,
    /// In-process backend only.
    pub single_writer: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: None,
            enabled: true,
            quiet: true,
            ttl: None,
            transforms: TransformTable::new(),
            tags: BTreeSet::new(),
            bind_caller_identity: false,
            allow_disable: true,
            key_mode: KeyMode::Hash,
            namespace: None,
            single_writer: false,
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = Some(capacity);
        self
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
    pub fn with_transform(mut self, param: impl Into<String>, transform: ArgTransform) -> Self {
        self.transforms.insert(param, transform);
        self
    }
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
    pub fn with_bind_caller_identity(mut self, bind: bool) -> Self {
        self.bind_caller_identity = bind;
        self
    }
    pub fn with_allow_disable(mut self, allow: bool) -> Self {
        self.allow_disable = allow;
        self
    }
    pub fn with_key_mode(mut self, mode: KeyMode) -> Self {
        self.key_mode = mode;
        self
    }
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
    pub fn with_single_writer(mut self, single_writer: bool) -> Self {
        self.single_writer = single_writer;
        self
    }

    pub(crate) fn key_deriver(&self) -> KeyDeriver {
        let deriver = KeyDeriver::new()
            .with_transforms(self.transforms.clone())
            .with_bind_caller_identity(self.bind_caller_identity)
            .with_mode(self.key_mode);
        match self.namespace {
            Some(ref ns) => deriver.with_namespace(ns.clone()),
            None => deriver,
        }
    }
}
