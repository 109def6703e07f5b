//! Threshold alert evaluation.
//!
//! Pure functions over stat snapshots; delivery of alerts is someone else's job.

use crate::config::AlertThresholds;
use crate::observability::collector::{DependencyStats, WorkerStats};
use crate::resilience::BreakerState;

/// Human-readable alerts for every threshold crossed.
pub fn evaluate(
    thresholds: &AlertThresholds,
    workers: &[WorkerStats],
    dependencies: &[DependencyStats],
    breakers: &[(String, BreakerState)],
) -> Vec<String> {
    let mut alerts = Vec::new();

    for worker in workers.iter().filter(|w| w.requests > 0) {
        if worker.failure_rate_pct > thresholds.worker_failure_rate_pct {
            alerts.push(format!(
                "worker {} failure rate {:.1}% exceeds {:.1}%",
                worker.worker, worker.failure_rate_pct, thresholds.worker_failure_rate_pct
            ));
        }
        if worker.latency.p95 > thresholds.p95_latency_ms {
            alerts.push(format!(
                "worker {} p95 latency {:.0}ms exceeds {:.0}ms",
                worker.worker, worker.latency.p95, thresholds.p95_latency_ms
            ));
        }
    }

    for dependency in dependencies {
        if dependency.calls > 0 && dependency.error_rate_pct > thresholds.dependency_error_rate_pct {
            alerts.push(format!(
                "dependency {} error rate {:.1}% exceeds {:.1}%",
                dependency.dependency, dependency.error_rate_pct, thresholds.dependency_error_rate_pct
            ));
        }
        if let (Some(limit), Some(remaining)) = (dependency.quota_limit, dependency.quota_remaining) {
            let floor = limit as f64 * thresholds.quota_remaining_pct / 100.0;
            if (remaining as f64) < floor {
                alerts.push(format!(
                    "dependency {} quota low: {} of {} remaining",
                    dependency.dependency, remaining, limit
                ));
            }
        }
    }

    for (dependency, state) in breakers {
        if *state != BreakerState::Closed {
            alerts.push(format!("circuit breaker {} is {}", dependency, state.as_str()));
        }
    }

    alerts
}
