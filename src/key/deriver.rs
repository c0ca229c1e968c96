//! Cache key derivation.

use super::signature::{BoundArgs, CallArgs, Signature};
use crate::error::{ArgumentBindingError, ErrorContext};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// How the canonical string is turned into the final lookup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Fixed-width SHA-256 hex digest.
    #[default]
    Hash,
    /// zlib + base64; reversible with [`decompress_key`].
    Compress,
    /// The canonical string itself.
    #[serde(rename = "none")]
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    value: String,
    mode: KeyMode,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// The canonical string behind this key, when the mode is reversible.
    pub fn canonical(&self) -> Option<String> {
        match self.mode {
            KeyMode::Plain => Some(self.value.clone()),
            KeyMode::Compress => decompress_key(&self.value).ok(),
            KeyMode::Hash => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Pure, deterministic replacement for one argument value.
pub type ArgTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Parameter name to transform, applied after binding and before rendering.
#[derive(Clone, Default)]
pub struct TransformTable(BTreeMap<String, ArgTransform>);

impl TransformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: impl Into<String>, transform: ArgTransform) {
        self.0.insert(param.into(), transform);
    }

    pub fn with(mut self, param: impl Into<String>, transform: ArgTransform) -> Self {
        self.insert(param, transform);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn apply(&self, bound: &mut BoundArgs) {
        for (param, transform) in &self.0 {
            if let Some(value) = bound.get_mut(param) {
                *value = transform(value);
            }
        }
    }
}

impl fmt::Debug for TransformTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Turns calls into cache keys under one decorator's configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    transforms: TransformTable,
    bind_caller_identity: bool,
    namespace: Option<String>,
    mode: KeyMode,
}

impl KeyDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transforms(mut self, transforms: TransformTable) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_bind_caller_identity(mut self, bind: bool) -> Self {
        self.bind_caller_identity = bind;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_mode(mut self, mode: KeyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Canonical string for a call, before hashing or compression.
    ///
    /// Layout: `[id=<token>;][ns=<namespace>;]fn=<identity>;args=<json>`.
    /// Token, namespace and identity render as JSON strings, so separators
    /// inside them cannot shift segment boundaries. Object keys render
    /// sorted; arrays keep their order.
    pub fn canonical(
        &self,
        signature: &Signature,
        args: &CallArgs,
    ) -> std::result::Result<String, ArgumentBindingError> {
        let mut bound = signature.bind(args)?;
        self.transforms.apply(&mut bound);

        let mut out = String::new();
        if self.bind_caller_identity {
            out.push_str("id=");
            out.push_str(&quoted(&identity_token(args)));
            out.push(';');
        }
        if let Some(ref ns) = self.namespace {
            out.push_str("ns=");
            out.push_str(&quoted(ns));
            out.push(';');
        }
        out.push_str("fn=");
        out.push_str(&quoted(&signature.identity().to_string()));
        out.push_str(";args=");
        out.push_str(&bound.into_value().to_string());
        Ok(out)
    }

    pub fn derive(
        &self,
        signature: &Signature,
        args: &CallArgs,
    ) -> std::result::Result<CacheKey, ArgumentBindingError> {
        let canonical = self.canonical(signature, args)?;
        let value = match self.mode {
            KeyMode::Hash => hash_key(&canonical),
            KeyMode::Compress => compress_key(&canonical),
            KeyMode::Plain => canonical,
        };
        Ok(CacheKey {
            value,
            mode: self.mode,
        })
    }
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn identity_token(args: &CallArgs) -> String {
    if let Some(receiver) = args.receiver() {
        return receiver.to_string();
    }
    args.positional()
        .first()
        .map(Value::to_string)
        .unwrap_or_else(|| "none".to_string())
}

pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn compress_key(raw: &str) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writes into a Vec cannot fail.
    let compressed = encoder
        .write_all(raw.as_bytes())
        .and_then(|_| encoder.finish())
        .unwrap_or_default();
    STANDARD.encode(compressed)
}

pub fn decompress_key(key: &str) -> Result<String> {
    let compressed = STANDARD.decode(key).map_err(|e| {
        Error::key_decoding_with_context(
            "compressed key is not valid base64",
            ErrorContext::new().with_details(e.to_string()),
        )
    })?;
    let mut raw = String::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_string(&mut raw)?;
    Ok(raw)
}
