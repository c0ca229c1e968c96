//! # Backend Availability
//!
//! Keeps callers of the networked backend from hammering a store that is
//! known to be down.
//!
//! ## States
//!
//! - **Available**: connection attempts go through; successful ones are
//!   cached per connection name and reused
//! - **Unavailable**: entered on a failed connection attempt or a failed
//!   command; attempts inside the retry interval (default 300 s) return no
//!   connection immediately, the first attempt after it retries for real
//!
//! Every connection attempt is confirmed with a `PING` bounded by a short
//! liveness timeout (default 1 s) before the handle is trusted.
//!
//! ```rust
//! use memo_cache::cache::store::MemoryStore;
//! use memo_cache::config::ConnectionParams;
//! use memo_cache::resilience::{AvailabilityTracker, StaticConnector};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(MemoryStore::new());
//! let tracker = AvailabilityTracker::new(Arc::new(StaticConnector::new(store)))
//!     .with_retry_interval(Duration::from_secs(30));
//! assert!(tracker.connection("default", &ConnectionParams::default()).is_some());
//! ```

pub mod availability;

pub use availability::{
    AvailabilitySnapshot, AvailabilityTracker, Connector, RedisConnector, StaticConnector,
    DEFAULT_LIVENESS_TIMEOUT, DEFAULT_RETRY_INTERVAL,
};
