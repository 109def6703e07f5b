//! Process-wide metrics exported through the `metrics` facade.
//!
//! # Metrics
//! - `tideway_dispatch_total` (counter): dispatches by worker, capability, outcome
//! - `tideway_dispatch_duration_seconds` (histogram): dispatch latency by worker
//! - `tideway_dependency_attempts_total` (counter): raw attempts by dependency, outcome
//! - `tideway_retries_total` (counter): scheduled retries by dependency
//! - `tideway_cache_lookups_total` (counter): cache lookups by result
//! - `tideway_breaker_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `tideway_worker_health` (gauge): 1=healthy, 0=unhealthy
//! - `tideway_plans_total` (counter): composite plans by status
//!
//! These mirror what `MetricsService` keeps in memory; the Prometheus exporter
//! is only installed when `observability.prometheus_enabled` is set.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::BreakerState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_dispatch(worker: &str, capability: &str, success: bool, latency: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "tideway_dispatch_total",
        "worker" => worker.to_string(),
        "capability" => capability.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("tideway_dispatch_duration_seconds", "worker" => worker.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_attempt(dependency: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "tideway_dependency_attempts_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(dependency: &str) {
    counter!("tideway_retries_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("tideway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_breaker_state(dependency: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::Open => 1.0,
        BreakerState::HalfOpen => 2.0,
    };
    gauge!("tideway_breaker_state", "dependency" => dependency.to_string()).set(value);
}

pub fn record_worker_health(worker: &str, healthy: bool) {
    gauge!("tideway_worker_health", "worker" => worker.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_registered_workers(count: usize) {
    gauge!("tideway_registered_workers").set(count as f64);
}

pub fn record_plan(status: &'static str) {
    counter!("tideway_plans_total", "status" => status).increment(1);
}
