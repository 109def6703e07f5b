//! Failure taxonomy shared by every resilience component.
//!
//! # Propagation
//! ```text
//! worker call fails
//!     → Transient / RateLimited / Timeout   (retried by resilience::retries)
//!     → BreakerOpen                         (surfaces immediately)
//!     → Validation / Permanent              (never retried)
//!     → Exhausted { attempts, last }        (retry gave up, wraps the last error)
//! ```

use std::time::Duration;
use thiserror::Error;

/// Errors produced while dispatching work to a dependency.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// Network failure or 5xx from the dependency.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Dependency answered 429.
    #[error("rate limited by dependency")]
    RateLimited {
        /// Hint taken from a `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// The dependency is isolated by its circuit breaker.
    #[error("circuit breaker open for {dependency}")]
    BreakerOpen { dependency: String },

    /// Bad input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Non-retryable rejection (4xx other than 429).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The call did not settle within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Retries were exhausted; carries the last observed error.
    #[error("{last} (gave up after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        last: Box<ServiceError>,
    },
}

/// Result type for orchestration operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Build an error from an HTTP status returned by a dependency.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => ServiceError::RateLimited { retry_after },
            400 | 422 => ServiceError::Validation(message),
            s if s >= 500 => ServiceError::Transient(format!("status {}: {}", s, message)),
            s => ServiceError::Permanent(format!("status {}: {}", s, message)),
        }
    }

    /// The innermost error, looking through retry annotations.
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Stable code used in wire envelopes.
    pub fn code(&self) -> &'static str {
        match self.root() {
            ServiceError::Transient(_) => "TRANSIENT",
            ServiceError::RateLimited { .. } => "RATE_LIMITED",
            ServiceError::BreakerOpen { .. } => "BREAKER_OPEN",
            ServiceError::Validation(_) => "VALIDATION",
            ServiceError::Permanent(_) => "PERMANENT",
            ServiceError::Timeout(_) => "TIMEOUT",
            ServiceError::Exhausted { .. } => "EXHAUSTED",
        }
    }

    /// Inverse of [`ServiceError::code`] for errors reported by remote workers.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "RATE_LIMITED" => ServiceError::RateLimited { retry_after: None },
            "VALIDATION" => ServiceError::Validation(message),
            "PERMANENT" => ServiceError::Permanent(message),
            // a worker's own downstream trouble is transient from our side
            _ => ServiceError::Transient(message),
        }
    }

    /// Default retryable predicate: network-level errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transient(_) | ServiceError::RateLimited { .. } | ServiceError::Timeout(_)
        )
    }

    /// Whether this outcome should count against a dependency's breaker.
    ///
    /// Bad input is the caller's fault, not the dependency's.
    pub fn counts_as_dependency_failure(&self) -> bool {
        !matches!(self.root(), ServiceError::Validation(_) | ServiceError::BreakerOpen { .. })
    }

    /// Retry-after hint, if the dependency gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            ServiceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ServiceError::from_status(503, "down", None), ServiceError::Transient(_)));
        assert!(matches!(ServiceError::from_status(404, "missing", None), ServiceError::Permanent(_)));
        assert!(matches!(ServiceError::from_status(422, "bad", None), ServiceError::Validation(_)));
        assert_eq!(
            ServiceError::from_status(429, "", Some(Duration::from_secs(2))).retry_after(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_exhausted_reports_root_code() {
        let err = ServiceError::Exhausted {
            attempts: 4,
            last: Box::new(ServiceError::Transient("reset".into())),
        };
        assert_eq!(err.code(), "TRANSIENT");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ServiceError::BreakerOpen { dependency: "tides".into() }.is_retryable());
        assert!(!ServiceError::Validation("x".into()).is_retryable());
        assert!(!ServiceError::Validation("x".into()).counts_as_dependency_failure());
    }
}
