//! 记忆化缓存模块：进程内 LRU 后端与网络后端，带运行时开关。
//!
//! # Memoization Caches
//!
//! Decorators that remember the results of expensive calls, backed either by
//! an in-process LRU map or by a networked key/value store shared across
//! processes.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`LocalMemo`] | In-process decorator holding live values |
//! | [`RemoteMemo`] | Networked decorator holding serialized values |
//! | [`Memoized`] | A wrapped function plus its decorator |
//! | [`CacheControl`] | Enable, disable, clear, quiet and introspection |
//! | [`CacheRegistry`] | Named decorators with tag-scoped bulk control |
//! | [`CachePolicy`] | Per-decorator configuration |
//! | [`InProcessCache`] | Bounded access-ordered map |
//! | [`NetworkedCache`] | Store access plus recency-index eviction |
//! | [`store::KvStore`] | Key/value and list commands used by the networked backend |
//!
//! ## Example
//!
//! ```rust
//! use memo_cache::cache::{CachePolicy, Capacity, LocalMemo, Memo, Memoized};
//! use memo_cache::key::{CallArgs, FunctionIdentity, Signature};
//! use std::sync::Arc;
//!
//! let signature = Signature::new(FunctionIdentity::new("rates.rs", "rate")).param("plan");
//! let memo: Arc<dyn Memo<f64, memo_cache::Error>> = Arc::new(LocalMemo::<f64>::new(
//!     signature,
//!     &CachePolicy::new().with_capacity(Capacity::Bounded(64)),
//! ));
//! let rate = Memoized::new(memo, |args: &CallArgs| {
//!     Ok(args.positional()[0].as_str().map_or(0.0, |p| p.len() as f64))
//! });
//! assert_eq!(rate.call(&CallArgs::new().arg("gold")).unwrap(), 4.0);
//! assert_eq!(rate.memo().size(), 1);
//! ```
//!
//! ## Networked Eviction
//!
//! The networked store has no size bound of its own. Each namespace keeps a
//! recency index next to its values and the oldest *inserted* entry is
//! evicted once the index exceeds capacity. Hits do not refresh an entry.
//!
//! ## Failure Handling
//!
//! Store outages never reach callers. Reads become misses, writes are
//! skipped, and the shared [`AvailabilityTracker`](crate::resilience::AvailabilityTracker)
//! stops connection attempts until its retry interval has passed.

mod local;
mod memo;
mod policy;
mod registry;
mod remote;
pub mod store;

pub use local::{InProcessCache, DEFAULT_LOCAL_CAPACITY, UNBOUNDED_LOCAL_CAPACITY};
pub use memo::{CacheControl, LocalMemo, Memo, Memoized, RemoteMemo};
pub use policy::{CachePolicy, Capacity};
pub use registry::{CacheRegistry, CacheReport, CacheReportEntry};
pub use remote::{index_key, value_key, NetworkedCache, DEFAULT_REMOTE_CAPACITY};
