//! System health classification.
//!
//! # Quorum Rule
//! ```text
//! no unhealthy workers            → Healthy
//! some unhealthy, strict majority healthy → Degraded
//! otherwise                       → Unhealthy
//! ```
//!
//! An even split counts as Unhealthy: half the fleet down is not a majority
//! up. A worker whose health is still unknown counts as unhealthy.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl SystemHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemHealth::Healthy => "healthy",
            SystemHealth::Degraded => "degraded",
            SystemHealth::Unhealthy => "unhealthy",
        }
    }

    /// Gauge value: 2 healthy, 1 degraded, 0 unhealthy.
    pub fn level(&self) -> f64 {
        match self {
            SystemHealth::Healthy => 2.0,
            SystemHealth::Degraded => 1.0,
            SystemHealth::Unhealthy => 0.0,
        }
    }
}

/// Classify `healthy` out of `total` workers.
pub fn classify(healthy: usize, total: usize) -> SystemHealth {
    let healthy = healthy.min(total);
    if healthy == total {
        SystemHealth::Healthy
    } else if healthy * 2 > total {
        SystemHealth::Degraded
    } else {
        SystemHealth::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum() {
        assert_eq!(classify(3, 3), SystemHealth::Healthy);
        assert_eq!(classify(2, 3), SystemHealth::Degraded);
        assert_eq!(classify(1, 3), SystemHealth::Unhealthy);
        assert_eq!(classify(0, 3), SystemHealth::Unhealthy);
    }

    #[test]
    fn test_edges() {
        assert_eq!(classify(0, 0), SystemHealth::Healthy);
        assert_eq!(classify(1, 2), SystemHealth::Unhealthy);
        assert_eq!(classify(4, 5), SystemHealth::Degraded);
        assert_eq!(classify(0, 1), SystemHealth::Unhealthy);
    }
}
