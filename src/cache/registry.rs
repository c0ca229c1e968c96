//! Registry of installed decorators with tag-scoped bulk control.

use super::memo::{CacheControl, LocalMemo, Memo, RemoteMemo};
use super::policy::CachePolicy;
use crate::config::{BackendKind, ConnectionParams, PolicyTable, RemoteTarget};
use crate::key::Signature;
use crate::resilience::AvailabilityTracker;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Named decorators, usually one per cached method of a service.
///
/// Tag filters select entries carrying any of the given tags; an empty
/// filter selects every entry.
pub struct CacheRegistry {
    entries: RwLock<BTreeMap<String, Arc<dyn CacheControl>>>,
    tracker: Arc<AvailabilityTracker>,
}

impl CacheRegistry {
    /// Registry whose remote decorators share [`AvailabilityTracker::global`].
    pub fn new() -> Self {
        Self::with_tracker(AvailabilityTracker::global())
    }

    pub fn with_tracker(tracker: Arc<AvailabilityTracker>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        &self.tracker
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<dyn CacheControl>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn CacheControl>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `memo` under `name`, returning whatever was there before.
    pub fn register(
        &self,
        name: impl Into<String>,
        memo: Arc<dyn CacheControl>,
    ) -> Option<Arc<dyn CacheControl>> {
        let name = name.into();
        debug!(name = %name, backend = memo.backend_name(), "registering cache");
        self.write().insert(name, memo)
    }

    /// Forgets `name`. Callers holding the decorator keep using it.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn CacheControl>> {
        self.write().remove(name)
    }

    pub fn install_local<V>(
        &self,
        name: impl Into<String>,
        signature: Signature,
        policy: &CachePolicy,
    ) -> Arc<LocalMemo<V>>
    where
        V: Clone + Send + 'static,
    {
        let memo = Arc::new(LocalMemo::new(signature, policy));
        self.register(name, memo.clone());
        memo
    }

    pub fn install_remote<V>(
        &self,
        name: impl Into<String>,
        signature: Signature,
        policy: &CachePolicy,
        target: RemoteTarget,
    ) -> Arc<RemoteMemo<V>>
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        let memo = Arc::new(RemoteMemo::new(
            signature,
            policy,
            Arc::clone(&self.tracker),
            target,
        ));
        self.register(name, memo.clone());
        memo
    }

    /// Installs the decorator configured for `method` in `table`.
    ///
    /// Returns `None` when the table has no entry for the method. Remote
    /// entries connect with `params` under the entry's connection name.
    pub fn install_configured<V, E>(
        &self,
        table: &PolicyTable,
        method: &str,
        signature: Signature,
        params: &ConnectionParams,
    ) -> Result<Option<Arc<dyn Memo<V, E>>>>
    where
        V: Clone + Send + Serialize + DeserializeOwned + 'static,
        E: From<Error> + 'static,
    {
        let Some(settings) = table.get(method) else {
            return Ok(None);
        };
        let policy = settings.to_policy()?;
        let memo: Arc<dyn Memo<V, E>> = match settings.backend {
            BackendKind::Local => self.install_local::<V>(method, signature, &policy),
            BackendKind::Remote => {
                let target = RemoteTarget::new(settings.connection_name(), params.clone());
                self.install_remote::<V>(method, signature, &policy, target)
            }
        };
        Ok(Some(memo))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CacheControl>> {
        self.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn select(&self, tags: &[&str]) -> Vec<Arc<dyn CacheControl>> {
        self.read()
            .values()
            .filter(|m| m.matches_tags(tags))
            .cloned()
            .collect()
    }

    /// Each bulk operation returns the number of entries it touched.
    pub fn enable(&self, tags: &[&str]) -> usize {
        let selected = self.select(tags);
        selected.iter().for_each(|m| m.enable());
        selected.len()
    }

    pub fn disable(&self, tags: &[&str], clear_first: bool) -> usize {
        let selected = self.select(tags);
        selected.iter().for_each(|m| m.disable(clear_first));
        selected.len()
    }

    pub fn clear(&self, tags: &[&str]) -> usize {
        let selected = self.select(tags);
        selected.iter().for_each(|m| m.clear());
        selected.len()
    }

    pub fn set_quiet(&self, tags: &[&str], quiet: bool) -> usize {
        let selected = self.select(tags);
        selected.iter().for_each(|m| m.set_quiet(quiet));
        selected.len()
    }

    pub fn report(&self) -> CacheReport {
        let entries = self
            .read()
            .iter()
            .map(|(name, m)| CacheReportEntry {
                name: name.clone(),
                function: m.name().to_string(),
                backend: m.backend_name(),
                enabled: m.is_enabled(),
                size: m.size(),
                tags: m.tags().clone(),
            })
            .collect();
        CacheReport { entries }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.report().fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheReportEntry {
    pub name: String,
    pub function: String,
    pub backend: &'static str,
    pub enabled: bool,
    pub size: usize,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub entries: Vec<CacheReportEntry>,
}

impl CacheReport {
    pub fn get(&self, name: &str) -> Option<&CacheReportEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.entries {
            let state = if e.enabled { "enabled" } else { "disabled" };
            write!(f, "{} [{}] {} size={}", e.name, e.backend, state, e.size)?;
            if !e.tags.is_empty() {
                let tags: Vec<&str> = e.tags.iter().map(String::as_str).collect();
                write!(f, " tags={}", tags.join(","))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
