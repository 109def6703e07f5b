//! Periodic worker health aggregation.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::cache::entry::unix_millis;
use crate::config::RegistryConfig;
use crate::health::heartbeat::{assess, HeartbeatTracker};
use crate::health::state::{classify, SystemHealth};
use crate::observability::metrics;
use crate::registry::{AgentStatus, WorkerHealth, WorkerRegistry};

/// Result of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: SystemHealth,
    pub healthy: usize,
    pub total: usize,
    pub agents: Vec<AgentStatus>,
    /// Workers deregistered in this pass for prolonged silence.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<String>,
    pub timestamp: u64,
}

pub struct HealthMonitor {
    registry: Arc<WorkerRegistry>,
    heartbeats: HeartbeatTracker,
    config: RegistryConfig,
    last_status: Mutex<Option<SystemHealth>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<WorkerRegistry>, heartbeats: HeartbeatTracker, config: RegistryConfig) -> Self {
        Self {
            registry,
            heartbeats,
            config,
            last_status: Mutex::new(None),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.config.check_interval_secs,
            grace_secs = self.config.grace_secs,
            eviction_secs = self.config.eviction_secs,
            probe_endpoints = self.config.probe_endpoints,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self) -> HealthReport {
        self.check_at(unix_millis()).await
    }

    /// Aggregate health as of `now_ms` (Unix milliseconds).
    pub async fn check_at(&self, now_ms: u64) -> HealthReport {
        let grace = Duration::from_secs(self.config.grace_secs);
        let eviction_ms = self.config.eviction_secs.saturating_mul(1_000);
        let mut evicted = Vec::new();

        for registered in self.registry.workers() {
            let descriptor = &registered.descriptor;

            if descriptor.local {
                if let Err(e) = self.heartbeats.beat_at(&descriptor.id, now_ms).await {
                    tracing::debug!(worker = %descriptor.id, error = %e, "Local heartbeat write failed");
                }
                descriptor.record_heartbeat(now_ms);
            }

            match self.heartbeats.read(&descriptor.id).await {
                Ok(Some(record)) => descriptor.record_heartbeat(record.timestamp),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker = %descriptor.id, error = %e, "Heartbeat read failed, using last known heartbeat");
                }
            }

            let last = descriptor.last_heartbeat_ms();
            let silent_for = now_ms.saturating_sub(last.unwrap_or(descriptor.registered_at_ms));
            if !descriptor.local && silent_for > eviction_ms {
                tracing::warn!(worker = %descriptor.id, silent_ms = silent_for, "Evicting silent worker");
                self.registry.deregister(&descriptor.id);
                if let Err(e) = self.heartbeats.clear(&descriptor.id).await {
                    tracing::debug!(worker = %descriptor.id, error = %e, "Heartbeat cleanup failed");
                }
                metrics::record_worker_health(&descriptor.id, false);
                evicted.push(descriptor.id.clone());
                continue;
            }

            let mut health = assess(last, now_ms, grace);
            if health == WorkerHealth::Healthy && self.config.probe_endpoints && !registered.worker.probe().await {
                health = WorkerHealth::Unhealthy;
            }

            let previous = descriptor.set_health(health);
            if previous != health {
                match health {
                    WorkerHealth::Healthy => tracing::info!(worker = %descriptor.id, "Worker healthy"),
                    _ => tracing::warn!(
                        worker = %descriptor.id,
                        last_heartbeat = ?last,
                        "Worker unhealthy"
                    ),
                }
            }
            metrics::record_worker_health(&descriptor.id, health == WorkerHealth::Healthy);
        }

        self.summarize(now_ms, evicted)
    }

    /// Classify current descriptor health without refreshing it.
    pub fn current(&self) -> HealthReport {
        self.summarize(unix_millis(), Vec::new())
    }

    fn summarize(&self, now_ms: u64, evicted: Vec<String>) -> HealthReport {
        let descriptors = self.registry.descriptors();
        let total = descriptors.len();
        let healthy = descriptors.iter().filter(|d| d.is_healthy()).count();
        let status = classify(healthy, total);

        {
            let mut last = self.last_status.lock().expect("health status mutex poisoned");
            if *last != Some(status) {
                if last.is_some() {
                    tracing::info!(status = status.as_str(), healthy, total, "System health changed");
                }
                *last = Some(status);
            }
        }
        metrics::record_registered_workers(total);

        HealthReport {
            status,
            healthy,
            total,
            agents: descriptors.iter().map(|d| d.status()).collect(),
            evicted,
            timestamp: now_ms,
        }
    }
}
