//! Shared external store.
//!
//! The store backs the shared cache tier and worker heartbeat records. Values
//! are JSON strings with an optional TTL, the same contract a Redis-style
//! deployment offers.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by a shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed value at {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value store shared between orchestrator instances.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value`; it disappears after `ttl` when one is given.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Reachability check used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value.
pub async fn set_json<T: Serialize>(
    store: &dyn SharedStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw, ttl).await
}

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`SharedStore`].
///
/// Expired keys are dropped on access. `set_available(false)` makes every
/// operation fail, which is how outages are simulated.
#[derive(Debug)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::SeqCst);
        if previous != available {
            tracing::warn!(available, "Memory store availability changed");
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let now = Instant::now();
        if let Some(slot) = self.slots.get(key) {
            if slot.is_live(now) {
                return Ok(Some(slot.value.clone()));
            }
        }
        self.slots.remove_if(key, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        // a TTL past the clock's range never expires
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.slots.insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.slots.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
