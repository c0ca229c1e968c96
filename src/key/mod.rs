//! # Cache Key Derivation
//!
//! Turns a call (function identity plus positional and keyword arguments)
//! into a stable lookup key.
//!
//! ## Pipeline
//!
//! 1. [`Signature::bind`] matches the call against the declared parameters,
//!    applies defaults and drops the receiver and any keyword collector.
//! 2. The decorator's [`TransformTable`] replaces selected argument values
//!    (see [`transforms`]).
//! 3. [`KeyDeriver`] renders a canonical string: optional caller identity
//!    token, optional namespace, function identity, then the bound arguments
//!    as JSON with object keys sorted and arrays in order.
//! 4. The canonical string is hashed, compressed or used as-is per
//!    [`KeyMode`].
//!
//! ```rust
//! use memo_cache::key::{CallArgs, FunctionIdentity, KeyDeriver, Signature};
//!
//! let sig = Signature::new(FunctionIdentity::new("rates.rs", "rate"))
//!     .param("plan")
//!     .param_with_default("region", "us");
//! let deriver = KeyDeriver::new();
//! let a = deriver.derive(&sig, &CallArgs::new().arg("gold")).unwrap();
//! let b = deriver.derive(&sig, &CallArgs::new().arg("gold").kw("region", "us")).unwrap();
//! assert_eq!(a, b);
//! ```

mod deriver;
mod signature;
pub mod transforms;

pub use deriver::{
    compress_key, decompress_key, hash_key, ArgTransform, CacheKey, KeyDeriver, KeyMode,
    TransformTable,
};
pub use signature::{BoundArgs, CallArgs, FunctionIdentity, InstanceId, Param, ParamKind, Signature};
