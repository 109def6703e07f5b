//! Two-tier TTL cache.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cache::entry::{CacheEntry, CachedValue, SharedEntry, MAX_TTL};
use crate::cache::store::{get_json, set_json, SharedStore};
use crate::config::CacheConfig;

const SHARED_PREFIX: &str = "cache:";

/// TTL cache with an optional shared tier.
///
/// Reads check the local layer first, then the shared store (populating the
/// local layer on a hit). Writes go to both. Shared-store failures are logged
/// and degrade to a miss or a local-only write.
pub struct TtlCache {
    local: DashMap<String, CacheEntry>,
    shared: Option<Arc<dyn SharedStore>>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            local: DashMap::new(),
            shared: None,
            default_ttl,
        }
    }

    pub fn with_shared(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(store);
        self
    }

    pub fn from_config(config: &CacheConfig, store: Arc<dyn SharedStore>) -> Self {
        let cache = Self::new(config.default_ttl());
        if config.shared {
            cache.with_shared(store)
        } else {
            cache
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_with_metadata(key).await.map(|cached| cached.value)
    }

    pub async fn get_with_metadata(&self, key: &str) -> Option<CachedValue> {
        if let Some(cached) = self.get_local(key) {
            return Some(cached);
        }

        let store = self.shared.as_ref()?;
        let shared = match get_json::<SharedEntry>(store.as_ref(), &shared_key(key)).await {
            Ok(found) => found?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Shared cache read failed, treating as miss");
                return None;
            }
        };

        let entry = CacheEntry::from_shared(key, shared)?;
        let cached = entry.to_cached();
        tracing::debug!(key = %key, remaining_ms = cached.remaining_ttl.as_millis() as u64, "Cache populated from shared tier");
        self.local.insert(key.to_string(), entry);
        Some(cached)
    }

    /// Write to both tiers. `None` uses the default TTL.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_TTL);
        if ttl.is_zero() {
            return;
        }

        if let Some(store) = &self.shared {
            let shared = SharedEntry::new(value.clone(), ttl);
            if let Err(e) = set_json(store.as_ref(), &shared_key(key), &shared, Some(ttl)).await {
                tracing::warn!(key = %key, error = %e, "Shared cache write failed, keeping local copy only");
            }
        }

        self.local.insert(key.to_string(), CacheEntry::new(key, value, ttl));
    }

    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(store) = &self.shared {
            if let Err(e) = store.delete(&shared_key(key)).await {
                tracing::warn!(key = %key, error = %e, "Shared cache invalidation failed");
            }
        }
    }

    fn get_local(&self, key: &str) -> Option<CachedValue> {
        if let Some(entry) = self.local.get(key) {
            if entry.is_fresh() {
                return Some(entry.to_cached());
            }
        }
        // lazy eviction; a concurrent fresh write must survive
        self.local.remove_if(key, |_, entry| !entry.is_fresh());
        None
    }

    /// Drop expired local entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.local.len();
        self.local.retain(|_, entry| entry.is_fresh());
        before.saturating_sub(self.local.len())
    }

    /// Run [`TtlCache::sweep`] every `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.local.len(), "Cache sweep");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Cache sweeper stopping");
                    break;
                }
            }
        }
    }

    /// Entries currently held locally, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

fn shared_key(key: &str) -> String {
    format!("{}{}", SHARED_PREFIX, key)
}

/// `"{capability}:{canonical JSON of arguments}"`. Object keys are sorted so
/// equal arguments always produce the same key.
pub fn cache_key(capability: &str, arguments: &Value) -> String {
    let mut key = String::with_capacity(capability.len() + 32);
    key.push_str(capability);
    key.push(':');
    write_canonical(arguments, &mut key);
    key
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<_> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
