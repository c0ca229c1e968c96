//! Connection parameters and policy tables.
//!
//! Connection parameters come from `REDIS_HOST`, `REDIS_PORT` and `REDIS_DB`,
//! falling back to `localhost:6379/0`. Policy tables map method names to
//! caching policies and are usually loaded from YAML:
//!
//! ```yaml
//! lookup:
//!   backend: remote
//!   capacity: 500
//!   ttl_seconds: 3600
//!   tags: [claims]
//!   transforms:
//!     dos: year_month
//!     zipcode: "truncate:4"
//! rates:
//!   capacity: null
//! ```

use crate::cache::{CachePolicy, Capacity};
use crate::error::ErrorContext;
use crate::key::{transforms, KeyMode};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DB: i64 = 0;
pub const DEFAULT_CONNECTION: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub db: i64,
    /// Read/write timeout for ordinary commands; `None` blocks on the socket.
    pub op_timeout: Option<Duration>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: DEFAULT_DB,
            op_timeout: None,
        }
    }
}

impl ConnectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds parameters from an environment-like lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut params = Self::default();
        if let Some(host) = lookup("REDIS_HOST").filter(|h| !h.trim().is_empty()) {
            params.host = host.trim().to_string();
        }
        if let Some(port) = lookup("REDIS_PORT") {
            match port.trim().parse() {
                Ok(p) => params.port = p,
                Err(_) => warn!("ignoring unparsable REDIS_PORT={:?}", port),
            }
        }
        if let Some(db) = lookup("REDIS_DB") {
            match db.trim().parse() {
                Ok(d) => params.db = d,
                Err(_) => warn!("ignoring unparsable REDIS_DB={:?}", db),
            }
        }
        params
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// A logical connection name plus the parameters used to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub params: ConnectionParams,
}

impl RemoteTarget {
    pub fn new(name: impl Into<String>, params: ConnectionParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// The `default` connection, parameterised from the environment.
    pub fn from_env() -> Self {
        Self::new(DEFAULT_CONNECTION, ConnectionParams::from_env())
    }
}

impl Default for RemoteTarget {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION, ConnectionParams::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

/// Serializable form of a [`CachePolicy`]; transforms are referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySettings {
    pub backend: BackendKind,
    /// Absent picks the backend default; `null` means unbounded.
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    pub enabled: bool,
    pub quiet: bool,
    pub ttl_seconds: Option<u64>,
    pub transforms: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub bind_caller_identity: bool,
    pub allow_disable: bool,
    pub key_mode: KeyMode,
    pub namespace: Option<String>,
    /// Logical connection name for the remote backend.
    pub connection: Option<String>,
    pub single_writer: bool,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Capacity>, D::Error>
where
    D: Deserializer<'de>,
{
    Capacity::deserialize(deserializer).map(Some)
}

impl Default for PolicySettings {
    fn default() -> Self {
        let policy = CachePolicy::default();
        Self {
            backend: BackendKind::Local,
            capacity: None,
            enabled: policy.enabled,
            quiet: policy.quiet,
            ttl_seconds: None,
            transforms: BTreeMap::new(),
            tags: Vec::new(),
            bind_caller_identity: policy.bind_caller_identity,
            allow_disable: policy.allow_disable,
            key_mode: policy.key_mode,
            namespace: None,
            connection: None,
            single_writer: policy.single_writer,
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> Result<CachePolicy> {
        let mut policy = CachePolicy::new()
            .with_enabled(self.enabled)
            .with_quiet(self.quiet)
            .with_tags(self.tags.iter().cloned())
            .with_bind_caller_identity(self.bind_caller_identity)
            .with_allow_disable(self.allow_disable)
            .with_key_mode(self.key_mode)
            .with_single_writer(self.single_writer);
        policy.capacity = self.capacity;
        policy.ttl = self.ttl_seconds.map(Duration::from_secs);
        policy.namespace = self.namespace.clone();
        for (param, name) in &self.transforms {
            let transform = transforms::by_name(name).ok_or_else(|| {
                Error::configuration_with_context(
                    format!("unknown argument transform '{}'", name),
                    ErrorContext::new()
                        .with_field_path(format!("transforms.{}", param))
                        .with_details("expected year_month, ignore, truncate:N or date:FORMAT")
                        .with_source("policy_settings"),
                )
            })?;
            policy.transforms.insert(param.clone(), transform);
        }
        Ok(policy)
    }

    pub fn connection_name(&self) -> &str {
        self.connection.as_deref().unwrap_or(DEFAULT_CONNECTION)
    }
}

/// Method name to caching settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    entries: BTreeMap<String, PolicySettings>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let table: Self = serde_yaml::from_str(text)?;
        // Resolve every transform now so bad names fail at load time.
        for (method, settings) in &table.entries {
            settings.to_policy().map_err(|e| match e {
                Error::Configuration { message, context } => Error::Configuration {
                    message,
                    context: ErrorContext {
                        field_path: context.field_path.map(|p| format!("{}.{}", method, p)),
                        ..context
                    },
                },
                other => other,
            })?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, method: impl Into<String>, settings: PolicySettings) {
        self.entries.insert(method.into(), settings);
    }

    pub fn get(&self, method: &str) -> Option<&PolicySettings> {
        self.entries.get(method)
    }

    pub fn policy(&self, method: &str) -> Result<Option<CachePolicy>> {
        self.entries.get(method).map(PolicySettings::to_policy).transpose()
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies `patch` to every entry.
    pub fn with_overrides(mut self, patch: impl Fn(&mut PolicySettings)) -> Self {
        self.entries.values_mut().for_each(|s| patch(s));
        self
    }
}
