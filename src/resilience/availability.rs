use crate::cache::store::{KvStore, RedisStore};
use crate::config::ConnectionParams;
use crate::Result;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens store connections for the tracker.
pub trait Connector: Send + Sync {
    fn connect(&self, params: &ConnectionParams, timeout: Duration) -> Result<Arc<dyn KvStore>>;
}

/// Connects to Redis with [`RedisStore::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl Connector for RedisConnector {
    fn connect(&self, params: &ConnectionParams, timeout: Duration) -> Result<Arc<dyn KvStore>> {
        let store: Arc<dyn KvStore> = Arc::new(RedisStore::open(params, timeout)?);
        Ok(store)
    }
}

/// Hands out one pre-built store for every connection name.
pub struct StaticConnector {
    store: Arc<dyn KvStore>,
}

impl StaticConnector {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

impl Connector for StaticConnector {
    fn connect(&self, _: &ConnectionParams, _: Duration) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::clone(&self.store))
    }
}

#[derive(Debug, Clone)]
pub struct AvailabilitySnapshot {
    pub available: bool,
    pub retry_interval_ms: u64,
    /// Time left before the next connection attempt is allowed, if throttled.
    pub retry_remaining_ms: Option<u64>,
    pub connections: usize,
}

#[derive(Debug)]
struct State {
    available: bool,
    last_retry: Option<Instant>,
}

/// Availability state for the networked backend, shared by every decorator
/// that uses it.
///
/// - Starts available
/// - A failed connection attempt marks the backend unavailable
/// - While unavailable, attempts inside the retry interval return no
///   connection without touching the network
/// - Handles are cached per connection name; the flag and the retry timer
///   are shared across names
pub struct AvailabilityTracker {
    retry_interval: Duration,
    liveness_timeout: Duration,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    handles: Mutex<HashMap<String, Arc<dyn KvStore>>>,
}

static GLOBAL_TRACKER: Lazy<Arc<AvailabilityTracker>> =
    Lazy::new(|| Arc::new(AvailabilityTracker::new(Arc::new(RedisConnector))));

impl AvailabilityTracker {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            connector,
            state: Mutex::new(State {
                available: true,
                last_retry: None,
            }),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide tracker backed by [`RedisConnector`].
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_TRACKER)
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn KvStore>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_available(&self) -> bool {
        self.state().available
    }

    /// Returns a live connection for `name`, or `None` if the backend is
    /// unreachable or still inside its retry interval.
    pub fn connection(&self, name: &str, params: &ConnectionParams) -> Option<Arc<dyn KvStore>> {
        if let Some(handle) = self.handles().get(name) {
            return Some(Arc::clone(handle));
        }

        {
            let st = self.state();
            if !st.available {
                if let Some(at) = st.last_retry {
                    if at.elapsed() < self.retry_interval {
                        debug!(connection = name, "backend unavailable, skipping connection attempt");
                        return None;
                    }
                }
            }
        }

        let attempt = self
            .connector
            .connect(params, self.liveness_timeout)
            .and_then(|store| store.ping().map(|_| store));
        match attempt {
            Ok(store) => {
                let recovered = {
                    let mut st = self.state();
                    let was_down = !st.available;
                    st.available = true;
                    st.last_retry = None;
                    was_down
                };
                if recovered {
                    info!(connection = name, url = %params.url(), "cache backend available again");
                }
                Some(Arc::clone(
                    self.handles().entry(name.to_string()).or_insert(store),
                ))
            }
            Err(e) => {
                warn!(connection = name, url = %params.url(), error = %e, "cache backend unreachable");
                self.mark_unavailable();
                None
            }
        }
    }

    /// The handle already open for `name`, without attempting a connection.
    pub fn cached(&self, name: &str) -> Option<Arc<dyn KvStore>> {
        self.handles().get(name).cloned()
    }

    /// Drops the handle for `name` after a failed command and starts the
    /// retry interval.
    pub fn report_failure(&self, name: &str) {
        self.handles().remove(name);
        self.mark_unavailable();
    }

    fn mark_unavailable(&self) {
        let mut st = self.state();
        st.available = false;
        st.last_retry = Some(Instant::now());
    }

    pub fn snapshot(&self) -> AvailabilitySnapshot {
        let connections = self.handles().len();
        let st = self.state();
        let retry_remaining_ms = match (st.available, st.last_retry) {
            (false, Some(at)) => self
                .retry_interval
                .checked_sub(at.elapsed())
                .filter(|d| !d.is_zero())
                .map(|d| d.as_millis() as u64),
            _ => None,
        };
        AvailabilitySnapshot {
            available: st.available,
            retry_interval_ms: self.retry_interval.as_millis() as u64,
            retry_remaining_ms,
            connections,
        }
    }
}
