//! # memo-cache
//!
//! 透明的函数结果记忆化：进程内 LRU 后端与带熔断的 Redis 后端。
//!
//! Transparent memoization for expensive calls, with an in-process LRU
//! backend and a networked Redis backend guarded by an availability circuit
//! breaker.
//!
//! ## Overview
//!
//! A decorated function is described by a [`key::Signature`]. Every call is
//! bound against it, normalised by per-parameter transforms and turned into a
//! deterministic [`key::CacheKey`]. The decorator then looks the key up in its
//! backend and only runs the function on a miss.
//!
//! ## Core Philosophy
//!
//! - **Invisible failures**: a down cache store costs latency, never errors
//! - **Deterministic keys**: identical bound arguments give identical keys
//! - **Runtime control**: every decorator can be disabled, cleared or
//!   silenced while the process runs, individually or by tag
//!
//! ## Quick Start
//!
//! ```rust
//! use memo_cache::cache::{CachePolicy, CacheRegistry, Memo, Memoized};
//! use memo_cache::key::{transforms, CallArgs, Signature};
//! use memo_cache::function_identity;
//! use std::sync::Arc;
//!
//! let registry = CacheRegistry::new();
//! let signature = Signature::new(function_identity!("lookup"))
//!     .param("zipcode")
//!     .param_with_default("verbose", false);
//! let policy = CachePolicy::new()
//!     .with_transform("zipcode", transforms::truncate(4))
//!     .with_transform("verbose", transforms::constant(serde_json::Value::Null))
//!     .with_tag("claims");
//! let memo: Arc<dyn Memo<String, memo_cache::Error>> =
//!     registry.install_local::<String>("lookup", signature, &policy);
//!
//! let lookup = Memoized::new(memo, |args: &CallArgs| {
//!     Ok(format!("region for {}", args.positional()[0]))
//! });
//! let first = lookup.call(&CallArgs::new().arg(29220))?;
//! let second = lookup.call(&CallArgs::new().arg(29221))?;
//! assert_eq!(first, second);
//!
//! registry.disable(&["claims"], true);
//! # Ok::<(), memo_cache::Error>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`key`] | Signatures, argument binding, transforms and key derivation |
//! | [`cache`] | Backends, decorators, policies and the registry |
//! | [`resilience`] | Availability tracking for the networked backend |
//! | [`config`] | Connection parameters and YAML policy tables |
//! | [`error`] | Error types |

pub mod cache;
pub mod config;
pub mod key;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{
    CacheControl, CachePolicy, CacheRegistry, Capacity, LocalMemo, Memo, Memoized, RemoteMemo,
};
pub use config::{ConnectionParams, PolicyTable, RemoteTarget};
pub use key::{CallArgs, FunctionIdentity, KeyMode, Signature};
pub use resilience::AvailabilityTracker;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{ArgumentBindingError, Error, ErrorContext};
