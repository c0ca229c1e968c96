//! Key/value stores behind the networked backend.

use crate::config::ConnectionParams;
use crate::error::ErrorContext;
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// The subset of the Redis command set the networked backend relies on.
///
/// Values are opaque byte blobs; lists hold store keys.
pub trait KvStore: Send + Sync {
    /// `GET key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// `SET key value [EX ttl]`
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
    /// `DEL key...`, returning how many keys existed.
    fn del(&self, keys: &[String]) -> Result<usize>;
    /// `LPUSH list item`, returning the new length.
    fn lpush(&self, list: &str, item: &str) -> Result<usize>;
    /// `LREM list 0 item`, returning how many copies were removed.
    fn lrem(&self, list: &str, item: &str) -> Result<usize>;
    /// `LRANGE list 0 -1`
    fn lrange_all(&self, list: &str) -> Result<Vec<String>>;
    /// `RPOP list`
    fn rpop(&self, list: &str) -> Result<Option<String>>;
    /// `LLEN list`
    fn llen(&self, list: &str) -> Result<usize>;
    /// `PING`
    fn ping(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

enum Slot {
    Value {
        data: Vec<u8>,
        expires_at: Option<Instant>,
    },
    List(VecDeque<String>),
}

impl Slot {
    fn is_expired(&self) -> bool {
        match self {
            Slot::Value {
                expires_at: Some(at),
                ..
            } => Instant::now() >= *at,
            _ => false,
        }
    }
}

/// Process-local store with Redis list and expiry semantics.
///
/// Stands in for Redis in tests and single-process deployments. Can be taken
/// offline to simulate an outage: every command then fails.
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys (values and lists).
    pub fn key_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| !s.is_expired())
            .count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|s| !s.is_expired())
            .unwrap_or(false)
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::unavailable_with_context(
                "store is offline",
                ErrorContext::new().with_source("memory_store"),
            ));
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, s| !s.is_expired());
        Ok(slots)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> Error {
    Error::configuration_with_context(
        "operation against a key holding the wrong kind of value",
        ErrorContext::new()
            .with_field_path(key)
            .with_source("memory_store"),
    )
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.slots()?.get(key) {
            Some(Slot::Value { data, .. }) => Ok(Some(data.clone())),
            Some(Slot::List(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.slots()?.insert(
            key.to_string(),
            Slot::Value {
                data: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        let mut slots = self.slots()?;
        Ok(keys.iter().filter(|k| slots.remove(*k).is_some()).count())
    }

    fn lpush(&self, list: &str, item: &str) -> Result<usize> {
        let mut slots = self.slots()?;
        match slots
            .entry(list.to_string())
            .or_insert_with(|| Slot::List(VecDeque::new()))
        {
            Slot::List(items) => {
                items.push_front(item.to_string());
                Ok(items.len())
            }
            Slot::Value { .. } => Err(wrong_type(list)),
        }
    }

    fn lrem(&self, list: &str, item: &str) -> Result<usize> {
        let mut slots = self.slots()?;
        let (removed, now_empty) = match slots.get_mut(list) {
            Some(Slot::List(items)) => {
                let before = items.len();
                items.retain(|i| i != item);
                (before - items.len(), items.is_empty())
            }
            Some(Slot::Value { .. }) => return Err(wrong_type(list)),
            None => return Ok(0),
        };
        if now_empty {
            slots.remove(list);
        }
        Ok(removed)
    }

    fn lrange_all(&self, list: &str) -> Result<Vec<String>> {
        match self.slots()?.get(list) {
            Some(Slot::List(items)) => Ok(items.iter().cloned().collect()),
            Some(Slot::Value { .. }) => Err(wrong_type(list)),
            None => Ok(Vec::new()),
        }
    }

    fn rpop(&self, list: &str) -> Result<Option<String>> {
        let mut slots = self.slots()?;
        let (popped, now_empty) = match slots.get_mut(list) {
            Some(Slot::List(items)) => {
                let popped = items.pop_back();
                (popped, items.is_empty())
            }
            Some(Slot::Value { .. }) => return Err(wrong_type(list)),
            None => return Ok(None),
        };
        // Redis drops a list once its last element is gone.
        if now_empty {
            slots.remove(list);
        }
        Ok(popped)
    }

    fn llen(&self, list: &str) -> Result<usize> {
        match self.slots()?.get(list) {
            Some(Slot::List(items)) => Ok(items.len()),
            Some(Slot::Value { .. }) => Err(wrong_type(list)),
            None => Ok(0),
        }
    }

    fn ping(&self) -> Result<()> {
        self.slots().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Synchronous Redis connection.
pub struct RedisStore {
    conn: Mutex<redis::Connection>,
    liveness_timeout: Duration,
    op_timeout: Option<Duration>,
}

impl RedisStore {
    /// Connects with `connect_timeout` bounding the TCP handshake.
    pub fn open(params: &ConnectionParams, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(params.url())?;
        let conn = client.get_connection_with_timeout(connect_timeout)?;
        conn.set_read_timeout(params.op_timeout)?;
        conn.set_write_timeout(params.op_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            liveness_timeout: connect_timeout,
            op_timeout: params.op_timeout,
        })
    }

    fn conn(&self) -> MutexGuard<'_, redis::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(redis::cmd("GET").arg(key).query(&mut *self.conn())?)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query::<()>(&mut *self.conn())?;
        Ok(())
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(redis::cmd("DEL").arg(keys).query(&mut *self.conn())?)
    }

    fn lpush(&self, list: &str, item: &str) -> Result<usize> {
        Ok(redis::cmd("LPUSH").arg(list).arg(item).query(&mut *self.conn())?)
    }

    fn lrem(&self, list: &str, item: &str) -> Result<usize> {
        Ok(redis::cmd("LREM")
            .arg(list)
            .arg(0)
            .arg(item)
            .query(&mut *self.conn())?)
    }

    fn lrange_all(&self, list: &str) -> Result<Vec<String>> {
        Ok(redis::cmd("LRANGE")
            .arg(list)
            .arg(0)
            .arg(-1)
            .query(&mut *self.conn())?)
    }

    fn rpop(&self, list: &str) -> Result<Option<String>> {
        Ok(redis::cmd("RPOP").arg(list).query(&mut *self.conn())?)
    }

    fn llen(&self, list: &str) -> Result<usize> {
        Ok(redis::cmd("LLEN").arg(list).query(&mut *self.conn())?)
    }

    /// Bounded by the liveness timeout rather than the operation timeout.
    fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        conn.set_read_timeout(Some(self.liveness_timeout))?;
        let pong = redis::cmd("PING").query::<String>(&mut *conn);
        conn.set_read_timeout(self.op_timeout)?;
        pong?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
