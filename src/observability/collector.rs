//! In-process metrics service.
//!
//! Keeps bounded series plus per-worker and per-dependency aggregates, answers
//! alert queries and renders the text exposition. Every recorder also mirrors
//! into the `metrics` facade.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{AlertThresholds, MetricsConfig};
use crate::observability::series::{Labels, MetricSeries, MetricType, Percentiles};
use crate::observability::{alerts, exposition, metrics};
use crate::resilience::{BreakerState, BreakerTransition};

/// Aggregates for one worker (logical requests, retries folded in).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub worker: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub failure_rate_pct: f64,
    pub avg_latency_ms: f64,
    pub latency: Percentiles,
}

/// Aggregates for one external dependency (every attempt counts).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStats {
    pub dependency: String,
    pub calls: u64,
    pub failures: u64,
    pub error_rate_pct: f64,
    pub quota_limit: Option<u64>,
    pub quota_used: u64,
    pub quota_remaining: Option<u64>,
}

#[derive(Debug)]
struct WorkerCounters {
    requests: u64,
    successes: u64,
    failures: u64,
    total_latency_ms: f64,
    latencies: VecDeque<f64>,
}

#[derive(Debug, Default)]
struct DependencyCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    quota_limit: Mutex<Option<u64>>,
    quota_used: AtomicU64,
}

/// Observes breakers, retries, the cache and the orchestrator.
pub struct MetricsService {
    series: DashMap<String, Mutex<MetricSeries>>,
    workers: DashMap<String, Mutex<WorkerCounters>>,
    dependencies: DashMap<String, DependencyCounters>,
    breakers: DashMap<String, BreakerState>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    retries: AtomicU64,
    thresholds: ArcSwap<AlertThresholds>,
    series_capacity: usize,
    latency_window: usize,
}

impl MetricsService {
    pub fn new(config: &MetricsConfig) -> Self {
        let service = Self {
            series: DashMap::new(),
            workers: DashMap::new(),
            dependencies: DashMap::new(),
            breakers: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            thresholds: ArcSwap::from_pointee(config.alerts.clone()),
            series_capacity: config.series_capacity.max(1),
            latency_window: config.latency_window.max(1),
        };
        for quota in &config.quotas {
            service.set_quota(&quota.dependency, quota.limit);
        }
        service
    }

    /// Append `value` to the series identified by `name` and `labels`.
    pub fn record_metric(&self, name: &str, value: f64, metric_type: MetricType, labels: Labels) {
        let key = series_key(name, &labels);
        let entry = self.series.entry(key).or_insert_with(|| {
            Mutex::new(MetricSeries::new(name, labels, metric_type, self.series_capacity))
        });
        entry.lock().expect("metric series mutex poisoned").push(value);
    }

    /// Outcome of one logical dispatch to a worker.
    pub fn record_worker_request(&self, worker: &str, capability: &str, success: bool, latency: Duration) {
        let latency_ms = latency.as_micros() as f64 / 1_000.0;
        {
            let entry = self.workers.entry(worker.to_string()).or_insert_with(|| {
                Mutex::new(WorkerCounters {
                    requests: 0,
                    successes: 0,
                    failures: 0,
                    total_latency_ms: 0.0,
                    latencies: VecDeque::new(),
                })
            });
            let mut counters = entry.lock().expect("worker stats mutex poisoned");
            counters.requests += 1;
            if success {
                counters.successes += 1;
            } else {
                counters.failures += 1;
            }
            counters.total_latency_ms += latency_ms;
            if counters.latencies.len() == self.latency_window {
                counters.latencies.pop_front();
            }
            counters.latencies.push_back(latency_ms);
        }
        metrics::record_dispatch(worker, capability, success, latency);
    }

    /// Outcome of one attempt against an external dependency.
    pub fn record_dependency_call(&self, dependency: &str, success: bool) {
        {
            let counters = self.dependencies.entry(dependency.to_string()).or_default();
            counters.calls.fetch_add(1, Ordering::Relaxed);
            counters.quota_used.fetch_add(1, Ordering::Relaxed);
            if !success {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::record_attempt(dependency, success);
    }

    pub fn set_quota(&self, dependency: &str, limit: u64) {
        let counters = self.dependencies.entry(dependency.to_string()).or_default();
        *counters.quota_limit.lock().expect("quota mutex poisoned") = Some(limit);
    }

    /// Overwrite quota usage with a figure reported by the dependency itself.
    pub fn record_quota_usage(&self, dependency: &str, used: u64) {
        let counters = self.dependencies.entry(dependency.to_string()).or_default();
        counters.quota_used.store(used, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(true);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);
    }

    pub fn record_breaker_transition(&self, transition: &BreakerTransition) {
        self.breakers.insert(transition.dependency.clone(), transition.to);
        metrics::record_breaker_state(&transition.dependency, transition.to);
    }

    pub fn record_retry_attempt(&self, dependency: &str) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        metrics::record_retry(dependency);
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        let mut stats: Vec<WorkerStats> = self
            .workers
            .iter()
            .map(|entry| {
                let counters = entry.value().lock().expect("worker stats mutex poisoned");
                let requests = counters.requests;
                WorkerStats {
                    worker: entry.key().clone(),
                    requests,
                    successes: counters.successes,
                    failures: counters.failures,
                    failure_rate_pct: rate_pct(counters.failures, requests),
                    avg_latency_ms: if requests == 0 {
                        0.0
                    } else {
                        counters.total_latency_ms / requests as f64
                    },
                    latency: Percentiles::from_values(counters.latencies.iter().copied()),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.worker.cmp(&b.worker));
        stats
    }

    pub fn dependency_stats(&self) -> Vec<DependencyStats> {
        let mut stats: Vec<DependencyStats> = self
            .dependencies
            .iter()
            .map(|entry| {
                let counters = entry.value();
                let calls = counters.calls.load(Ordering::Relaxed);
                let failures = counters.failures.load(Ordering::Relaxed);
                let used = counters.quota_used.load(Ordering::Relaxed);
                let limit = *counters.quota_limit.lock().expect("quota mutex poisoned");
                DependencyStats {
                    dependency: entry.key().clone(),
                    calls,
                    failures,
                    error_rate_pct: rate_pct(failures, calls),
                    quota_limit: limit,
                    quota_used: used,
                    quota_remaining: limit.map(|l| l.saturating_sub(used)),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        stats
    }

    fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn thresholds(&self) -> Arc<AlertThresholds> {
        self.thresholds.load_full()
    }

    /// Swap alert thresholds (config hot reload).
    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        if *self.thresholds.load_full() != thresholds {
            tracing::info!(?thresholds, "Alert thresholds updated");
            self.thresholds.store(Arc::new(thresholds));
        }
    }

    /// Evaluate thresholds. No I/O.
    pub fn check_alerts(&self) -> Vec<String> {
        alerts::evaluate(
            &self.thresholds.load(),
            &self.worker_stats(),
            &self.dependency_stats(),
            &self.breaker_states(),
        )
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Render every series and aggregate as flat text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        exposition::write_line(&mut out, "tideway_cache_hits_total", &[], self.cache_hits() as f64);
        exposition::write_line(&mut out, "tideway_cache_misses_total", &[], self.cache_misses() as f64);
        exposition::write_line(
            &mut out,
            "tideway_retries_total",
            &[],
            self.retries.load(Ordering::Relaxed) as f64,
        );

        for w in self.worker_stats() {
            let labels = [("worker", w.worker.as_str())];
            exposition::write_line(&mut out, "tideway_worker_requests_total", &labels, w.requests as f64);
            exposition::write_line(&mut out, "tideway_worker_failures_total", &labels, w.failures as f64);
            exposition::write_line(&mut out, "tideway_worker_latency_avg_ms", &labels, w.avg_latency_ms);
            for (quantile, value) in [("0.5", w.latency.p50), ("0.95", w.latency.p95), ("0.99", w.latency.p99)] {
                exposition::write_line(
                    &mut out,
                    "tideway_worker_latency_ms",
                    &[("worker", w.worker.as_str()), ("quantile", quantile)],
                    value,
                );
            }
        }

        for d in self.dependency_stats() {
            let labels = [("dependency", d.dependency.as_str())];
            exposition::write_line(&mut out, "tideway_dependency_calls_total", &labels, d.calls as f64);
            exposition::write_line(&mut out, "tideway_dependency_errors_total", &labels, d.failures as f64);
            if let Some(remaining) = d.quota_remaining {
                exposition::write_line(&mut out, "tideway_dependency_quota_remaining", &labels, remaining as f64);
            }
        }

        for (dependency, state) in self.breaker_states() {
            exposition::write_line(
                &mut out,
                "tideway_breaker_open",
                &[("dependency", dependency.as_str()), ("state", state.as_str())],
                if state == BreakerState::Closed { 0.0 } else { 1.0 },
            );
        }

        let mut keys: Vec<String> = self.series.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        for key in keys {
            let Some(entry) = self.series.get(&key) else {
                continue;
            };
            let series = entry.lock().expect("metric series mutex poisoned");
            let labels: Vec<(&str, &str)> = series
                .labels
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            match series.metric_type {
                MetricType::Counter => exposition::write_line(&mut out, &series.name, &labels, series.total()),
                MetricType::Gauge => {
                    exposition::write_line(&mut out, &series.name, &labels, series.latest().unwrap_or(0.0))
                }
                MetricType::Histogram => {
                    let p = series.percentiles();
                    for (quantile, value) in [("0.5", p.p50), ("0.95", p.p95), ("0.99", p.p99)] {
                        let mut with_quantile = labels.clone();
                        with_quantile.push(("quantile", quantile));
                        exposition::write_line(&mut out, &series.name, &with_quantile, value);
                    }
                    exposition::write_line(&mut out, &format!("{}_count", series.name), &labels, series.len() as f64);
                }
            }
        }

        out
    }
}

fn series_key(name: &str, labels: &Labels) -> String {
    let mut key = name.to_string();
    for (k, v) in labels {
        key.push('|');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

fn rate_pct(failed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}
