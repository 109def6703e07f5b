//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (predicate on [`ServiceError`])
//! - Execute retries with exponential backoff + jitter
//! - Enforce a retry budget (retries as a share of requests per window)
//!
//! Operations not declared idempotent are attempted exactly once.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::resilience::backoff::calculate_backoff;

/// Predicate deciding whether an error may be retried.
pub type RetryPredicate = Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>;

/// Observer invoked after every failed attempt.
pub type AttemptObserver = Arc<dyn Fn(&AttemptReport) + Send + Sync>;

/// Whether the caller declared the operation safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

/// What happened on one failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub error: ServiceError,
    /// Delay before the next attempt, `None` when giving up.
    pub next_delay: Option<Duration>,
}

/// Retry configuration for one logical operation.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: false,
            retryable: Arc::new(ServiceError::is_retryable),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let max_retries = if config.enabled { config.max_retries } else { 0 };
        Self::new(
            max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter)
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the default predicate (network errors, 5xx, 429, timeouts).
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ServiceError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, error: &ServiceError) -> bool {
        (self.retryable)(error)
    }

    /// Delay after failed attempt `attempt`, honoring a retry-after hint.
    pub fn delay_for(&self, attempt: u32, error: &ServiceError) -> Duration {
        let backoff = calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter);
        match error.retry_after() {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

struct BudgetWindow {
    started: Instant,
    requests: u64,
    retries: u64,
}

/// Caps retries to a share of requests within a rolling window.
pub struct RetryBudget {
    ratio: f64,
    min_retries: u64,
    window: Duration,
    state: Mutex<BudgetWindow>,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self::with_window(ratio, min_retries, Duration::from_secs(10))
    }

    pub fn with_window(ratio: f32, min_retries: u64, window: Duration) -> Self {
        Self {
            ratio: ratio as f64,
            min_retries,
            window,
            state: Mutex::new(BudgetWindow {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            }),
        }
    }

    fn roll(&self, state: &mut BudgetWindow) {
        if state.started.elapsed() >= self.window {
            state.started = Instant::now();
            state.requests = 0;
            state.retries = 0;
        }
    }

    /// Count an original (non-retry) request.
    pub fn record_request(&self) {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        state.requests += 1;
    }

    /// Take one retry from the budget if any is left.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        let allowed = ((state.requests as f64 * self.ratio) as u64).max(self.min_retries);
        if state.retries < allowed {
            state.retries += 1;
            true
        } else {
            false
        }
    }
}

/// Executes an async operation under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryClient {
    policy: RetryPolicy,
    budget: Option<Arc<RetryBudget>>,
    observer: Option<AttemptObserver>,
}

impl RetryClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            budget: None,
            observer: None,
        }
    }

    pub fn with_budget(mut self, budget: Arc<RetryBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Called after every failed attempt. Does not alter control flow.
    pub fn on_attempt<O>(mut self, observer: O) -> Self
    where
        O: Fn(&AttemptReport) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying retryable failures of idempotent operations.
    ///
    /// `operation` receives the 1-indexed attempt number. Once more than one
    /// attempt was made, the final error is wrapped in
    /// [`ServiceError::Exhausted`] with the attempt count.
    pub async fn execute<T, F, Fut>(&self, idempotency: Idempotency, mut operation: F) -> ServiceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let max_attempts = match idempotency {
            Idempotency::Idempotent => self.policy.max_retries.saturating_add(1),
            Idempotency::NonIdempotent => 1,
        };

        let mut attempt = 0;
        // delays never shrink, even after a retry-after hint
        let mut floor = Duration::ZERO;
        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let can_retry = attempt < max_attempts
                && self.policy.is_retryable(&error)
                && self.budget.as_ref().map_or(true, |b| b.try_acquire());
            let next_delay = can_retry.then(|| self.policy.delay_for(attempt, &error).max(floor));
            if let Some(delay) = next_delay {
                floor = delay;
            }

            if let Some(observer) = &self.observer {
                observer(&AttemptReport {
                    attempt,
                    error: error.clone(),
                    next_delay,
                });
            }

            match next_delay {
                Some(delay) => {
                    tracing::info!(attempt, delay = ?delay, error = %error, "Retrying operation");
                    tokio::time::sleep(delay).await;
                }
                None if attempt > 1 => {
                    return Err(ServiceError::Exhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                None => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_attempted_max_retries_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let delays = Arc::new(Mutex::new(Vec::new()));

        let recorded = delays.clone();
        let client = RetryClient::new(policy()).on_attempt(move |report| {
            if let Some(delay) = report.next_delay {
                recorded.lock().unwrap().push(delay);
            }
        });

        let counter = calls.clone();
        let result: ServiceResult<()> = client
            .execute(Idempotency::Idempotent, |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Transient("connection reset".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(ServiceError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, ServiceError::Transient(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let delays = delays.lock().unwrap().clone();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = RetryClient::new(policy())
            .execute(Idempotency::Idempotent, |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(ServiceError::Transient("503".into()))
                    } else {
                        Ok("tide table")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("tide table"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ServiceResult<()> = RetryClient::new(policy())
            .execute(Idempotency::Idempotent, |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Validation("bad station id".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_non_idempotent_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ServiceResult<()> = RetryClient::new(policy())
            .execute(Idempotency::NonIdempotent, |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Transient("reset".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ServiceError::Transient(_))));
    }

    #[test]
    fn test_retry_after_hint_is_honored_up_to_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5));
        let hinted = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(1, &hinted), Duration::from_secs(2));

        let huge = ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.delay_for(1, &huge), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_stay_non_decreasing_after_hint() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5));
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = delays.clone();
        let client = RetryClient::new(policy).on_attempt(move |report| {
            if let Some(delay) = report.next_delay {
                recorded.lock().unwrap().push(delay);
            }
        });

        let _: ServiceResult<()> = client
            .execute(Idempotency::Idempotent, |attempt| async move {
                if attempt == 1 {
                    Err(ServiceError::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                    })
                } else {
                    Err(ServiceError::Transient("503".into()))
                }
            })
            .await;

        let delays = delays.lock().unwrap().clone();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1)
            ]
        );
    }

    #[test]
    fn test_budget_limits_retries() {
        let budget = RetryBudget::new(0.5, 0);
        for _ in 0..4 {
            budget.record_request();
        }
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
    }

    #[test]
    fn test_disabled_config_means_no_retries() {
        let config = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_retries, 0);
    }
}
