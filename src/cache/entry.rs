//! Cache entry types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Longest TTL any entry may carry.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A value held in the local layer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub written_at: Instant,
    pub ttl: Duration,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_TTL);
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            written_at: now,
            ttl,
            expires_at: now + ttl,
        }
    }

    /// Rebuild a local entry from one read out of the shared tier, keeping its age.
    pub(crate) fn from_shared(key: &str, shared: SharedEntry) -> Option<Self> {
        let age = Duration::from_millis(unix_millis().saturating_sub(shared.written_at_ms));
        let ttl = Duration::from_millis(shared.ttl_ms).min(MAX_TTL);
        let remaining = ttl.checked_sub(age).filter(|r| !r.is_zero())?;

        let now = Instant::now();
        Some(Self {
            key: key.to_string(),
            value: shared.value,
            written_at: now.checked_sub(age).unwrap_or(now),
            ttl,
            expires_at: now + remaining,
        })
    }

    /// `now < expiry`.
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    pub fn age(&self) -> Duration {
        self.written_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Age and remaining TTL are read against one clock sample, so they
    /// always sum to the entry's TTL while it is fresh.
    pub fn to_cached(&self) -> CachedValue {
        let now = Instant::now();
        CachedValue {
            value: self.value.clone(),
            age: now.saturating_duration_since(self.written_at),
            remaining_ttl: self.expires_at.saturating_duration_since(now),
        }
    }
}

/// Result of `TtlCache::get_with_metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub age: Duration,
    pub remaining_ttl: Duration,
}

/// Serialized form of an entry in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SharedEntry {
    pub value: Value,
    pub written_at_ms: u64,
    pub ttl_ms: u64,
}

impl SharedEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            written_at_ms: unix_millis(),
            ttl_ms: ttl.min(MAX_TTL).as_millis() as u64,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_freshness_boundary() {
        let entry = CacheEntry::new("k", json!(1), Duration::from_secs(10));
        assert!(entry.is_fresh());

        tokio::time::advance(Duration::from_secs(4)).await;
        let cached = entry.to_cached();
        assert_eq!(cached.age, Duration::from_secs(4));
        assert_eq!(cached.remaining_ttl, Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!entry.is_fresh());
    }

    #[tokio::test]
    async fn test_expired_shared_entry_is_dropped() {
        let stale = SharedEntry {
            value: json!("old"),
            written_at_ms: unix_millis() - 10_000,
            ttl_ms: 5_000,
        };
        assert!(CacheEntry::from_shared("k", stale).is_none());

        let live = SharedEntry {
            value: json!("new"),
            written_at_ms: unix_millis() - 1_000,
            ttl_ms: 60_000,
        };
        let entry = CacheEntry::from_shared("k", live).unwrap();
        assert!(entry.remaining() <= Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let entry = CacheEntry::new("k", json!(1), Duration::from_secs(u64::MAX));
        assert_eq!(entry.ttl, MAX_TTL);
        assert!(entry.is_fresh());

        let shared = SharedEntry {
            value: json!(2),
            written_at_ms: unix_millis(),
            ttl_ms: u64::MAX,
        };
        let entry = CacheEntry::from_shared("k", shared).unwrap();
        assert!(entry.remaining() <= MAX_TTL);
    }
}
