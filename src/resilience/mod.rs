//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → retries.rs (retry with backoff while the error is retryable)
//!         → circuit_breaker.rs (fail fast while OPEN, one probe when HALF_OPEN)
//!             → timeouts.rs (per-attempt deadline)
//!                 → worker call
//! ```
//!
//! # Design Decisions
//! - The breaker sits inside the retry loop: every attempt is an outcome, and
//!   a `BreakerOpen` rejection is never retried
//! - Retries only for idempotent capabilities
//! - Breakers are created lazily, one per dependency id

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{
    BreakerRegistry, BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker,
    TransitionListener,
};
pub use retries::{AttemptReport, Idempotency, RetryBudget, RetryClient, RetryPolicy};
pub use timeouts::with_timeout;
