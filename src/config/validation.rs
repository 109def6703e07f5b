//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! relationships. Every problem is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::OrchestratorConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.call_ms == 0 {
        errors.push(ValidationError::new("timeouts.call_ms", "must be greater than 0"));
    }

    let retries = &config.retries;
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            format!(
                "base delay {}ms exceeds max delay {}ms",
                retries.base_delay_ms, retries.max_delay_ms
            ),
        ));
    }
    if !(0.0..=1.0).contains(&retries.budget_ratio) {
        errors.push(ValidationError::new("retries.budget_ratio", "must be within [0, 1]"));
    }

    let breaker = &config.breaker;
    if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            "breaker.failure_rate_threshold",
            "must be within (0, 1]",
        ));
    }
    if breaker.minimum_calls == 0 {
        errors.push(ValidationError::new("breaker.minimum_calls", "must be greater than 0"));
    }
    if breaker.window_size < breaker.minimum_calls {
        errors.push(ValidationError::new(
            "breaker.window_size",
            "must be at least breaker.minimum_calls",
        ));
    }
    if breaker.consecutive_failures == Some(0) {
        errors.push(ValidationError::new("breaker.consecutive_failures", "must be greater than 0"));
    }

    if config.cache.enabled && config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
    }

    let registry = &config.registry;
    if registry.heartbeat_ttl_secs == 0 {
        errors.push(ValidationError::new("registry.heartbeat_ttl_secs", "must be greater than 0"));
    }
    if registry.check_interval_secs == 0 {
        errors.push(ValidationError::new("registry.check_interval_secs", "must be greater than 0"));
    }
    if registry.grace_secs > registry.eviction_secs {
        errors.push(ValidationError::new(
            "registry.grace_secs",
            "must not exceed registry.eviction_secs",
        ));
    }

    if config.plan.branch_timeout_ms == 0 {
        errors.push(ValidationError::new("plan.branch_timeout_ms", "must be greater than 0"));
    }
    if config.plan.max_branches == 0 {
        errors.push(ValidationError::new("plan.max_branches", "must be greater than 0"));
    }

    if config.metrics.series_capacity == 0 {
        errors.push(ValidationError::new("metrics.series_capacity", "must be greater than 0"));
    }
    if config.metrics.latency_window == 0 {
        errors.push(ValidationError::new("metrics.latency_window", "must be greater than 0"));
    }
    for quota in &config.metrics.quotas {
        if quota.limit == 0 {
            errors.push(ValidationError::new(
                "metrics.quotas",
                format!("quota for '{}' has a zero limit", quota.dependency),
            ));
        }
    }

    if config.events.channel_capacity == 0 {
        errors.push(ValidationError::new("events.channel_capacity", "must be greater than 0"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected pretty or json", other),
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
