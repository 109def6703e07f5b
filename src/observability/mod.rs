//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retries, cache, orchestrator produce:
//!     → collector.rs (MetricsService: series + worker/dependency aggregates)
//!         → metrics.rs (mirrored into the `metrics` facade / Prometheus)
//!         → alerts.rs (threshold evaluation on demand)
//!         → exposition.rs (flat text for GET /metrics)
//!     → logging.rs (structured tracing events)
//! ```
//!
//! # Design Decisions
//! - Percentiles are derived on read from the most recent samples, never stored
//! - Every buffer is bounded; the oldest sample goes first
//! - Alert evaluation performs no I/O

pub mod alerts;
pub mod collector;
pub mod exposition;
pub mod logging;
pub mod metrics;
pub mod series;

pub use collector::{DependencyStats, MetricsService, WorkerStats};
pub use series::{Labels, MetricSeries, MetricType, Percentiles};
