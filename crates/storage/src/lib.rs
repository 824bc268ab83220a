pub mod ledger;
pub mod rate_limit;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use redis::aio::ConnectionManager;
use thiserror::Error;

pub use ledger::{DeliveryLedger, LedgerSnapshot, NotificationRecord};
pub use rate_limit::{RateDecision, RateLimiter};

/// Shared counting/ledger store.
///
/// The Redis backend is authoritative and safe across multiple service
/// instances; the in-memory backend mirrors its semantics for tests and
/// single-process development runs and must not be used where more than one
/// instance shares the counters.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

/// Result of one atomic fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub ttl_remaining: Duration,
}

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connect(redis::RedisError),
    #[error("store command failed: {0}")]
    Command(redis::RedisError),
    #[error("failed to decode stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Store {
    /// Connects to Redis. The connection manager reconnects with backoff on
    /// its own, so transient outages fail individual commands rather than the
    /// process.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Connect)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self {
            backend: Backend::Redis(manager),
        })
    }

    /// Builds a process-local store. Single-instance only.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::default()),
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let _: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)?;
                Ok(())
            }
            Backend::Memory(_) => Ok(()),
        }
    }

    /// Atomically increments a fixed-window counter, arming the window expiry
    /// on the first increment, and reports the remaining window time.
    ///
    /// Runs as a single MULTI/EXEC round trip so concurrent callers never
    /// lose updates (requires Redis 7 for `EXPIRE NX`).
    pub async fn incr_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(window.as_secs())
                    .arg("NX")
                    .cmd("TTL")
                    .arg(key);
                let (count, _armed, ttl): (u64, i64, i64) = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)?;
                let ttl_remaining = if ttl > 0 {
                    Duration::from_secs(ttl as u64)
                } else {
                    window
                };
                Ok(WindowCount {
                    count,
                    ttl_remaining,
                })
            }
            Backend::Memory(memory) => Ok(memory.incr_window(key, window)),
        }
    }

    /// Increments a monotonic counter without expiry.
    pub async fn incr_counter(&self, key: &str) -> Result<u64, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                redis::cmd("INCR")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)
            }
            Backend::Memory(memory) => Ok(memory.incr_counter(key)),
        }
    }

    pub async fn get_counter(&self, key: &str) -> Result<u64, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let value: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)?;
                Ok(value.and_then(|raw| raw.parse().ok()).unwrap_or(0))
            }
            Backend::Memory(memory) => Ok(memory.get_counter(key)),
        }
    }

    pub async fn put_record(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)?;
                Ok(())
            }
            Backend::Memory(memory) => {
                memory.put(key, value, Some(ttl));
                Ok(())
            }
        }
    }

    pub async fn get_record(&self, key: &str) -> Result<Option<String>, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)
            }
            Backend::Memory(memory) => Ok(memory.get(key)),
        }
    }

    /// Claims a key exactly once within `ttl`. Returns `false` when another
    /// caller already holds it (SET NX EX semantics).
    pub async fn set_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let outcome: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::Command)?;
                Ok(outcome.is_some())
            }
            Backend::Memory(memory) => Ok(memory.set_once(key, ttl)),
        }
    }

    /// Counts live keys under a prefix via cursor scans. Observability only;
    /// the count is approximate under concurrent expiry.
    pub async fn count_keys(&self, prefix: &str) -> Result<u64, StoreError> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let pattern = format!("{prefix}*");
                let mut cursor: u64 = 0;
                let mut total: u64 = 0;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await
                        .map_err(StoreError::Command)?;
                    total += keys.len() as u64;
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok(total)
            }
            Backend::Memory(memory) => Ok(memory.count_keys(prefix)),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local map mirroring the Redis command subset used above.
#[derive(Clone, Default)]
struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    fn incr_window(&self, key: &str, window: Duration) -> WindowCount {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.retain(|_, entry| !entry.is_expired(now));

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: Some(now + window),
        });
        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        let ttl_remaining = entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(window);
        WindowCount {
            count,
            ttl_remaining,
        }
    }

    fn incr_counter(&self, key: &str) -> u64 {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        count
    }

    fn get_counter(&self, key: &str) -> u64 {
        self.get(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("memory store poisoned");
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    fn set_once(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("memory store poisoned");
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => false,
            _ => {
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: "1".to_string(),
                        expires_at: Some(now + ttl),
                    },
                );
                true
            }
        }
    }

    fn count_keys(&self, prefix: &str) -> u64 {
        let now = Instant::now();
        let entries = self.entries.lock().expect("memory store poisoned");
        entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .count() as u64
    }
}
