//! Heartbeat records in the shared store.
//!
//! Each worker owns the key `heartbeat:{id}` holding `{workerId, timestamp}`
//! with a TTL. A missing key or a stale timestamp means the worker is silent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::entry::unix_millis;
use crate::cache::store::{get_json, set_json, SharedStore, StoreError};
use crate::registry::WorkerHealth;

pub const HEARTBEAT_PREFIX: &str = "heartbeat:";

pub fn heartbeat_key(worker_id: &str) -> String {
    format!("{}{}", HEARTBEAT_PREFIX, worker_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub worker_id: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

impl HeartbeatRecord {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }
}

/// Reads and writes heartbeat records.
#[derive(Clone)]
pub struct HeartbeatTracker {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl HeartbeatTracker {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Write a heartbeat stamped now.
    pub async fn beat(&self, worker_id: &str) -> Result<HeartbeatRecord, StoreError> {
        self.beat_at(worker_id, unix_millis()).await
    }

    pub async fn beat_at(&self, worker_id: &str, timestamp: u64) -> Result<HeartbeatRecord, StoreError> {
        let record = HeartbeatRecord {
            worker_id: worker_id.to_string(),
            timestamp,
        };
        set_json(self.store.as_ref(), &heartbeat_key(worker_id), &record, Some(self.ttl)).await?;
        tracing::trace!(worker = %worker_id, timestamp, "Heartbeat written");
        Ok(record)
    }

    pub async fn read(&self, worker_id: &str) -> Result<Option<HeartbeatRecord>, StoreError> {
        get_json(self.store.as_ref(), &heartbeat_key(worker_id)).await
    }

    pub async fn clear(&self, worker_id: &str) -> Result<(), StoreError> {
        self.store.delete(&heartbeat_key(worker_id)).await.map(|_| ())
    }

    /// Worker ids with a live heartbeat key.
    pub async fn live_workers(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.store.keys(HEARTBEAT_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(HEARTBEAT_PREFIX).map(str::to_string))
            .collect())
    }
}

/// Health implied by the most recent heartbeat time.
pub fn assess(last_heartbeat_ms: Option<u64>, now_ms: u64, grace: Duration) -> WorkerHealth {
    match last_heartbeat_ms {
        Some(ts) if now_ms.saturating_sub(ts) <= grace.as_millis() as u64 => WorkerHealth::Healthy,
        _ => WorkerHealth::Unhealthy,
    }
}
