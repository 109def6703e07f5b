//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt` (1-indexed):
/// `min(base * 2^(attempt-1) + jitter, max)`.
///
/// Jitter is up to 10% of the uncapped delay, so consecutive delays never
/// decrease.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    let jitter_range = delay_ms / 10;
    let jitter_ms = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(2000);

        assert_eq!(calculate_backoff(1, base, max, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, base, max, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, base, max, false), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, base, max, false), max);
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);
        for attempt in 1..20 {
            assert!(calculate_backoff(attempt, base, max, true) <= max);
        }
    }

    #[test]
    fn test_jittered_delays_are_non_decreasing() {
        let base = Duration::from_millis(50);
        let max = Duration::from_millis(3000);
        for _ in 0..50 {
            let mut previous = Duration::ZERO;
            for attempt in 1..10 {
                let delay = calculate_backoff(attempt, base, max, true);
                assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
