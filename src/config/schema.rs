//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the orchestrator.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker thresholds, applied to every guarded dependency.
    pub breaker: BreakerConfig,

    /// Result cache settings.
    pub cache: CacheConfig,

    /// Worker registry and heartbeat settings.
    pub registry: RegistryConfig,

    /// Composite plan settings.
    pub plan: PlanConfig,

    /// Metric buffers, alert thresholds and quotas.
    pub metrics: MetricsConfig,

    /// Progress event channel.
    pub events: EventConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for an inbound HTTP request, in seconds.
    pub request_secs: u64,

    /// Deadline for a single worker call attempt, in milliseconds.
    pub call_ms: u64,
}

impl TimeoutConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            call_ms: 10_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Percentage of requests that can be retries (retry budget).
    /// e.g., 0.2 for 20% budget.
    pub budget_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: true,
            budget_ratio: 0.2,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure ratio in the rolling window that opens the breaker (0.0, 1.0].
    pub failure_rate_threshold: f64,

    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: u32,

    /// Number of most recent outcomes kept in the rolling window.
    pub window_size: u32,

    /// Optional count-based trip: this many consecutive failures open the breaker.
    pub consecutive_failures: Option<u32>,

    /// Time spent OPEN before a probe is allowed, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 5,
            window_size: 20,
            consecutive_failures: None,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching of cacheable capabilities.
    pub enabled: bool,

    /// TTL used when a capability does not declare one, in seconds.
    pub default_ttl_secs: u64,

    /// Interval of the expired-entry sweep in seconds (0 disables it).
    pub sweep_interval_secs: u64,

    /// Back the local layer with the shared store.
    pub shared: bool,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            sweep_interval_secs: 60,
            shared: true,
        }
    }
}

/// Worker registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// TTL of the heartbeat key written on every heartbeat, in seconds.
    pub heartbeat_ttl_secs: u64,

    /// Heartbeat age after which a worker is unhealthy, in seconds.
    pub grace_secs: u64,

    /// Heartbeat silence after which a worker is deregistered, in seconds.
    pub eviction_secs: u64,

    /// Health aggregation interval in seconds.
    pub check_interval_secs: u64,

    /// Also probe each worker's health endpoint.
    pub probe_endpoints: bool,

    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: 30,
            grace_secs: 30,
            eviction_secs: 300,
            check_interval_secs: 10,
            probe_endpoints: false,
            probe_timeout_ms: 2_000,
        }
    }
}

/// Composite plan configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Per-branch deadline in milliseconds.
    pub branch_timeout_ms: u64,

    /// Upper bound on branches in one plan.
    pub max_branches: usize,
}

impl PlanConfig {
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_timeout_ms)
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            branch_timeout_ms: 30_000,
            max_branches: 32,
        }
    }
}

/// Metrics and alerting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Capacity of every metric series buffer.
    pub series_capacity: usize,

    /// Latency samples kept per worker for percentiles.
    pub latency_window: usize,

    /// Alert thresholds (hot reloadable).
    pub alerts: AlertThresholds,

    /// Known request quotas of external dependencies.
    pub quotas: Vec<QuotaConfig>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            series_capacity: 1_000,
            latency_window: 1_000,
            alerts: AlertThresholds::default(),
            quotas: Vec::new(),
        }
    }
}

/// Fixed thresholds evaluated by `MetricsService::check_alerts`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Per-worker failure rate, percent.
    pub worker_failure_rate_pct: f64,

    /// Per-worker p95 latency, milliseconds.
    pub p95_latency_ms: f64,

    /// External dependency error rate, percent.
    pub dependency_error_rate_pct: f64,

    /// Remaining quota, percent of the limit.
    pub quota_remaining_pct: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            worker_failure_rate_pct: 5.0,
            p95_latency_ms: 5_000.0,
            dependency_error_rate_pct: 10.0,
            quota_remaining_pct: 10.0,
        }
    }
}

/// Request quota of one external dependency.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Dependency id (matches the worker id that calls it).
    pub dependency: String,

    /// Requests allowed in the quota period.
    pub limit: u64,
}

/// Progress event channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventConfig {
    /// Buffered events per subscriber before it starts lagging.
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Install the Prometheus exporter for the `metrics` facade.
    pub prometheus_enabled: bool,

    /// Prometheus exporter bind address.
    pub prometheus_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            prometheus_enabled: false,
            prometheus_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
