//! Worker descriptors and capabilities.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use crate::cache::entry::unix_millis;

/// Health of a single worker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for WorkerHealth {
    fn from(val: u8) -> Self {
        match val {
            1 => WorkerHealth::Healthy,
            2 => WorkerHealth::Unhealthy,
            _ => WorkerHealth::Unknown,
        }
    }
}

impl WorkerHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerHealth::Unknown => "unknown",
            WorkerHealth::Healthy => "healthy",
            WorkerHealth::Unhealthy => "unhealthy",
        }
    }
}

/// A named operation a worker can perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    /// Results may be served from the cache.
    pub cacheable: bool,
    /// Per-capability cache TTL; the cache default applies when absent.
    pub ttl: Option<Duration>,
    /// Safe to retry.
    pub idempotent: bool,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cacheable: false,
            ttl: None,
            idempotent: true,
        }
    }

    pub fn cacheable(mut self, ttl: Option<Duration>) -> Self {
        self.cacheable = true;
        self.ttl = ttl;
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Capability as announced on the wire: a bare name or a detailed object.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CapabilitySpec {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        name: String,
        #[serde(default)]
        cacheable: bool,
        #[serde(default)]
        ttl_secs: Option<u64>,
        #[serde(default = "default_true")]
        idempotent: bool,
    },
}

impl From<CapabilitySpec> for Capability {
    fn from(spec: CapabilitySpec) -> Self {
        match spec {
            CapabilitySpec::Name(name) => Capability::new(name),
            CapabilitySpec::Detailed {
                name,
                cacheable,
                ttl_secs,
                idempotent,
            } => Capability {
                name,
                cacheable,
                ttl: ttl_secs.map(Duration::from_secs),
                idempotent,
            },
        }
    }
}

/// Registration announcement sent by a remote worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub capabilities: Vec<CapabilitySpec>,
    #[serde(default)]
    pub health_endpoint: Option<String>,
    /// Invocation endpoint; defaults to `{base of healthEndpoint}/invoke`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// A registered worker.
///
/// Health and heartbeat time are atomics so the health monitor can update
/// them in place inside a shared registry snapshot.
#[derive(Debug)]
pub struct WorkerDescriptor {
    pub id: String,
    pub capabilities: Vec<Capability>,
    pub endpoint: Option<String>,
    pub health_endpoint: Option<String>,
    /// In-process worker; the orchestrator heartbeats on its behalf.
    pub local: bool,
    pub registered_at_ms: u64,
    health: AtomicU8,
    /// 0 = never.
    last_heartbeat_ms: AtomicU64,
}

impl WorkerDescriptor {
    pub fn new(id: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities,
            endpoint: None,
            health_endpoint: None,
            local: false,
            registered_at_ms: unix_millis(),
            health: AtomicU8::new(WorkerHealth::Unknown as u8),
            last_heartbeat_ms: AtomicU64::new(0),
        }
    }

    pub fn with_endpoints(mut self, endpoint: Option<String>, health_endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self.health_endpoint = health_endpoint;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth::from(self.health.load(Ordering::Relaxed))
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == WorkerHealth::Healthy
    }

    /// Returns the previous health.
    pub fn set_health(&self, health: WorkerHealth) -> WorkerHealth {
        WorkerHealth::from(self.health.swap(health as u8, Ordering::Relaxed))
    }

    pub fn last_heartbeat_ms(&self) -> Option<u64> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn record_heartbeat(&self, timestamp_ms: u64) {
        self.last_heartbeat_ms.fetch_max(timestamp_ms, Ordering::Relaxed);
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id.clone(),
            status: self.health(),
            last_heartbeat: self.last_heartbeat_ms(),
            capabilities: self.capabilities.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

/// Entry of `GET /api/agents/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub id: String,
    pub status: WorkerHealth,
    pub last_heartbeat: Option<u64>,
    pub capabilities: Vec<String>,
}
