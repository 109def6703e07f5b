//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a single probe call tests recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: window failure rate >= threshold (after minimum_calls),
//!                or consecutive failures >= consecutive_failures
//! Open → Half-Open: reset_timeout elapsed since the Open transition
//! Half-Open → Closed: probe succeeds (all counters reset)
//! Half-Open → Open: probe fails or is abandoned (reset timer restarts)
//! ```
//!
//! State lives behind one mutex per breaker; decisions and transitions happen
//! in a single critical section, never across an await point.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::{ServiceError, ServiceResult};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Emitted on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub dependency: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Receives state-change notifications (the metrics service subscribes here).
pub type TransitionListener = Arc<dyn Fn(&BreakerTransition) + Send + Sync>;

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub window_calls: usize,
    pub window_failure_rate: f64,
    pub consecutive_failures: u32,
    pub since_transition_ms: u64,
}

#[derive(Debug)]
struct Counters {
    state: BreakerState,
    /// Most recent outcomes, `true` = failure.
    window: VecDeque<bool>,
    consecutive_failures: u32,
    successes: u64,
    failures: u64,
    rejected: u64,
    last_transition: Instant,
    probe_in_flight: bool,
}

impl Counters {
    fn window_failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failed = self.window.iter().filter(|failed| **failed).count();
        failed as f64 / self.window.len() as f64
    }

    fn reset(&mut self) {
        self.window.clear();
        self.consecutive_failures = 0;
        self.successes = 0;
        self.failures = 0;
    }
}

/// Outcome of a guarded call as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// The dependency answered but the call failed for a caller-side reason.
    Neutral,
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<Counters>,
    listener: Option<TransitionListener>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_listener(dependency, config, None)
    }

    pub fn with_listener(
        dependency: impl Into<String>,
        config: BreakerConfig,
        listener: Option<TransitionListener>,
    ) -> Self {
        let dependency = dependency.into();
        tracing::debug!(
            dependency = %dependency,
            failure_rate_threshold = config.failure_rate_threshold,
            minimum_calls = config.minimum_calls,
            reset_timeout_ms = config.reset_timeout_ms,
            "Circuit breaker initialized"
        );
        Self {
            dependency,
            config,
            inner: Mutex::new(Counters {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                consecutive_failures: 0,
                successes: 0,
                failures: 0,
                rejected: 0,
                last_transition: Instant::now(),
                probe_in_flight: false,
            }),
            listener,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Current state. An Open breaker whose reset timeout elapsed reports Half-Open.
    pub fn state(&self) -> BreakerState {
        let (state, transition) = {
            let mut counters = self.lock();
            let transition = self.maybe_half_open(&mut counters);
            (counters.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Execute `operation` under breaker protection.
    ///
    /// Rejected calls return [`ServiceError::BreakerOpen`] without invoking
    /// `operation`.
    pub async fn call<T, F, Fut>(&self, operation: F) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let permit = self.acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.settle(Outcome::Success),
            Err(e) if e.counts_as_dependency_failure() => permit.settle(Outcome::Failure),
            Err(_) => permit.settle(Outcome::Neutral),
        }
        result
    }

    /// Ask for permission to call the dependency.
    fn acquire(&self) -> ServiceResult<CallPermit<'_>> {
        let (admitted, transition) = {
            let mut counters = self.lock();
            let transition = self.maybe_half_open(&mut counters);
            let admitted = match counters.state {
                BreakerState::Closed => Some(false),
                BreakerState::HalfOpen if !counters.probe_in_flight => {
                    counters.probe_in_flight = true;
                    Some(true)
                }
                BreakerState::HalfOpen | BreakerState::Open => {
                    counters.rejected += 1;
                    None
                }
            };
            (admitted, transition)
        };
        self.notify(transition);

        match admitted {
            Some(probe) => {
                if probe {
                    tracing::info!(dependency = %self.dependency, "Circuit half-open, sending probe");
                }
                Ok(CallPermit {
                    breaker: self,
                    probe,
                    settled: false,
                })
            }
            None => Err(ServiceError::BreakerOpen {
                dependency: self.dependency.clone(),
            }),
        }
    }

    fn record(&self, probe: bool, outcome: Outcome) {
        let transition = {
            let mut counters = self.lock();
            match (probe, outcome) {
                (true, Outcome::Success) => {
                    counters.probe_in_flight = false;
                    counters.reset();
                    self.transition(&mut counters, BreakerState::Closed)
                }
                (true, Outcome::Failure) => {
                    counters.probe_in_flight = false;
                    counters.failures += 1;
                    self.transition(&mut counters, BreakerState::Open)
                }
                (true, Outcome::Neutral) => {
                    counters.probe_in_flight = false;
                    None
                }
                (false, Outcome::Neutral) => None,
                // a call admitted while Closed can finish after another call tripped the breaker
                (false, _) if counters.state != BreakerState::Closed => None,
                (false, Outcome::Success) => {
                    counters.successes += 1;
                    counters.consecutive_failures = 0;
                    self.push_outcome(&mut counters, false);
                    self.evaluate(&mut counters)
                }
                (false, Outcome::Failure) => {
                    counters.failures += 1;
                    counters.consecutive_failures += 1;
                    self.push_outcome(&mut counters, true);
                    self.evaluate(&mut counters)
                }
            }
        };
        self.notify(transition);
    }

    fn push_outcome(&self, counters: &mut Counters, failed: bool) {
        counters.window.push_back(failed);
        while counters.window.len() > self.config.window_size.max(1) as usize {
            counters.window.pop_front();
        }
    }

    fn evaluate(&self, counters: &mut Counters) -> Option<BreakerTransition> {
        let by_count = self
            .config
            .consecutive_failures
            .is_some_and(|limit| counters.consecutive_failures >= limit);
        let by_rate = counters.window.len() >= self.config.minimum_calls as usize
            && counters.window_failure_rate() >= self.config.failure_rate_threshold;

        if by_count || by_rate {
            tracing::warn!(
                dependency = %self.dependency,
                window_failure_rate = counters.window_failure_rate(),
                consecutive_failures = counters.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened"
            );
            self.transition(counters, BreakerState::Open)
        } else {
            None
        }
    }

    fn maybe_half_open(&self, counters: &mut Counters) -> Option<BreakerTransition> {
        if counters.state == BreakerState::Open
            && counters.last_transition.elapsed() >= self.config.reset_timeout()
        {
            self.transition(counters, BreakerState::HalfOpen)
        } else {
            None
        }
    }

    fn transition(&self, counters: &mut Counters, to: BreakerState) -> Option<BreakerTransition> {
        let from = counters.state;
        counters.last_transition = Instant::now();
        if from == to {
            return None;
        }
        counters.state = to;
        if to == BreakerState::Closed {
            tracing::info!(dependency = %self.dependency, "Circuit breaker closed (recovered)");
        }
        Some(BreakerTransition {
            dependency: self.dependency.clone(),
            from,
            to,
        })
    }

    fn notify(&self, transition: Option<BreakerTransition>) {
        if let (Some(transition), Some(listener)) = (transition, &self.listener) {
            listener(&transition);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let counters = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state,
            successes: counters.successes,
            failures: counters.failures,
            rejected: counters.rejected,
            window_calls: counters.window.len(),
            window_failure_rate: counters.window_failure_rate(),
            consecutive_failures: counters.consecutive_failures,
            since_transition_ms: counters.last_transition.elapsed().as_millis() as u64,
        }
    }
}

/// Permission to make one call. Dropping an unsettled probe counts as a failed probe.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.probe, outcome);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            tracing::warn!(dependency = %self.breaker.dependency, "Probe abandoned before settling");
            self.breaker.record(true, Outcome::Failure);
        }
    }
}

/// Lazily creates one breaker per dependency id.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listener: Option<TransitionListener>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            listener: None,
        }
    }

    /// Forward every transition of every breaker to `listener`.
    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// The breaker guarding `dependency`, created on first use.
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_listener(
                    dependency,
                    self.config.clone(),
                    self.listener.clone(),
                ))
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    /// Number of breakers currently rejecting calls.
    pub fn open_count(&self) -> usize {
        self.snapshots()
            .iter()
            .filter(|s| s.state != BreakerState::Closed)
            .count()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: 0.5,
            minimum_calls: 5,
            window_size: 10,
            consecutive_failures: None,
            reset_timeout_ms: 1_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> ServiceResult<()> {
        breaker
            .call(|| async { Err(ServiceError::Transient("upstream 503".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> ServiceResult<()> {
        breaker.call(|| async { Ok(()) }).await
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            let _ = fail(breaker).await;
        }
        let _ = succeed(breaker).await;
        let _ = succeed(breaker).await;
    }

    #[tokio::test]
    async fn test_trips_at_failure_rate_after_minimum_calls() {
        let breaker = CircuitBreaker::new("noaa", config());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        let _ = succeed(&breaker).await;
        // four calls are below minimum_calls
        assert_eq!(breaker.state(), BreakerState::Closed);
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::BreakerOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_consecutive_failure_trip() {
        let mut cfg = config();
        cfg.minimum_calls = 100;
        cfg.window_size = 100;
        cfg.consecutive_failures = Some(2);
        let breaker = CircuitBreaker::new("tides", cfg);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_trip() {
        let breaker = CircuitBreaker::new("routing", config());
        for _ in 0..10 {
            let _: ServiceResult<()> = breaker
                .call(|| async { Err(ServiceError::Validation("bad waypoint".into())) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_then_close() {
        let breaker = CircuitBreaker::new("noaa", config());
        trip(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(1_001)).await;

        let (release, hold) = oneshot::channel::<()>();
        let probe = breaker.call(|| async move {
            let _ = hold.await;
            Ok::<_, ServiceError>("probe")
        });
        let concurrent = async {
            tokio::task::yield_now().await;
            let result = breaker.call(|| async { Ok("second") }).await;
            let _ = release.send(());
            result
        };
        let (probe_result, concurrent_result) = tokio::join!(probe, concurrent);

        assert_eq!(probe_result, Ok("probe"));
        assert!(matches!(concurrent_result, Err(ServiceError::BreakerOpen { .. })));
        assert_eq!(breaker.state(), BreakerState::Closed);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.window_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new("noaa", config());
        trip(&breaker).await;

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        // the timer restarted at the failed probe
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&breaker).await, Err(ServiceError::BreakerOpen { .. })));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_counts_as_failure() {
        let breaker = CircuitBreaker::new("noaa", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let stalled = breaker.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ServiceError>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_registry_creates_lazily_and_notifies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let registry = BreakerRegistry::new(config()).with_listener(Arc::new(move |t: &BreakerTransition| {
            sink.lock().unwrap().push(t.clone());
        }));
        assert!(registry.is_empty());

        let breaker = registry.get("noaa");
        assert!(Arc::ptr_eq(&breaker, &registry.get("noaa")));
        trip(&breaker).await;

        let transitions = seen.lock().unwrap().clone();
        assert_eq!(
            transitions,
            vec![BreakerTransition {
                dependency: "noaa".into(),
                from: BreakerState::Closed,
                to: BreakerState::Open,
            }]
        );
        assert_eq!(registry.open_count(), 1);
    }
}
