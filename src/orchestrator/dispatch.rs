//! The orchestrator and single-operation dispatch.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::store::{SharedStore, StoreError};
use crate::cache::{cache_key, TtlCache};
use crate::config::{OrchestratorConfig, PlanConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::health::{HealthMonitor, HealthReport, HeartbeatRecord, HeartbeatTracker};
use crate::lifecycle::Shutdown;
use crate::observability::{Labels, MetricType, MetricsService};
use crate::orchestrator::events::{EventBus, EventType, ProgressEvent};
use crate::registry::{
    Capability, HttpWorker, Registration, Worker, WorkerDescriptor, WorkerHealth, WorkerRegistry,
};
use crate::resilience::{
    BreakerRegistry, BreakerTransition, Idempotency, RetryBudget, RetryClient, RetryPolicy,
};
use crate::resilience::timeouts::with_timeout;

/// Successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub value: Value,
    pub worker: String,
    pub cached: bool,
    pub cache_age_ms: Option<u64>,
    pub duration_ms: u64,
}

/// Coordinates workers, resilience, caching, metrics and progress events.
pub struct Orchestrator {
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) cache: Option<Arc<TtlCache>>,
    pub(crate) metrics: Arc<MetricsService>,
    pub(crate) events: EventBus,
    pub(crate) plan: PlanConfig,
    retry: RetryClient,
    call_timeout: Duration,
    store: Arc<dyn SharedStore>,
    heartbeats: HeartbeatTracker,
    monitor: Arc<HealthMonitor>,
    probe_timeout: Duration,
    sweep_interval: Duration,
    check_interval: Duration,
}

impl Orchestrator {
    pub fn new(config: &OrchestratorConfig, store: Arc<dyn SharedStore>) -> Self {
        let metrics = Arc::new(MetricsService::new(&config.metrics));

        let listener_metrics = metrics.clone();
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()).with_listener(Arc::new(
            move |transition: &BreakerTransition| listener_metrics.record_breaker_transition(transition),
        )));

        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(TtlCache::from_config(&config.cache, store.clone())));

        let budget = Arc::new(RetryBudget::new(config.retries.budget_ratio, 10));
        let retry = RetryClient::new(RetryPolicy::from_config(&config.retries)).with_budget(budget);

        let registry = Arc::new(WorkerRegistry::new());
        let heartbeats = HeartbeatTracker::new(
            store.clone(),
            Duration::from_secs(config.registry.heartbeat_ttl_secs),
        );
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            heartbeats.clone(),
            config.registry.clone(),
        ));

        tracing::info!(
            cache_enabled = cache.is_some(),
            max_retries = retry.policy().max_retries,
            call_timeout_ms = config.timeouts.call_ms,
            "Orchestrator initialized"
        );

        Self {
            registry,
            breakers,
            cache,
            metrics,
            events: EventBus::new(config.events.channel_capacity),
            plan: config.plan.clone(),
            retry,
            call_timeout: config.timeouts.call_timeout(),
            store,
            heartbeats,
            monitor,
            probe_timeout: Duration::from_millis(config.registry.probe_timeout_ms),
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs),
            check_interval: Duration::from_secs(config.registry.check_interval_secs),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> Option<&Arc<TtlCache>> {
        self.cache.as_ref()
    }

    /// Start the health monitor and cache sweeper; both stop on shutdown.
    pub fn start_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if !self.check_interval.is_zero() {
            let monitor = self.monitor.clone();
            handles.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }

        if let Some(cache) = &self.cache {
            if !self.sweep_interval.is_zero() {
                handles.push(tokio::spawn(
                    cache.clone().run_sweeper(self.sweep_interval, shutdown.subscribe()),
                ));
            }
        }

        handles
    }

    /// Register an in-process worker.
    pub async fn register_local(
        &self,
        worker: Arc<dyn Worker>,
        capabilities: Vec<Capability>,
    ) -> ServiceResult<Arc<WorkerDescriptor>> {
        let descriptor = WorkerDescriptor::new(worker.id(), capabilities).local();
        let descriptor = self.registry.register(descriptor, worker)?;
        self.mark_alive(&descriptor).await;
        Ok(descriptor)
    }

    /// Register a remote worker announced over HTTP.
    pub async fn register_remote(&self, registration: Registration) -> ServiceResult<Arc<WorkerDescriptor>> {
        let worker = HttpWorker::from_registration(&registration, self.probe_timeout)?;
        let capabilities: Vec<Capability> = registration.capabilities.into_iter().map(Into::into).collect();
        let descriptor = WorkerDescriptor::new(registration.id, capabilities)
            .with_endpoints(Some(worker.endpoint()), registration.health_endpoint);

        let descriptor = self.registry.register(descriptor, Arc::new(worker))?;
        self.mark_alive(&descriptor).await;
        Ok(descriptor)
    }

    async fn mark_alive(&self, descriptor: &WorkerDescriptor) {
        match self.heartbeats.beat(&descriptor.id).await {
            Ok(record) => descriptor.record_heartbeat(record.timestamp),
            Err(e) => {
                tracing::warn!(worker = %descriptor.id, error = %e, "Initial heartbeat not stored");
                descriptor.record_heartbeat(crate::cache::entry::unix_millis());
            }
        }
        descriptor.set_health(WorkerHealth::Healthy);
    }

    /// Refresh a worker's heartbeat.
    ///
    /// A store outage does not lose the heartbeat: it is still recorded on the
    /// descriptor, so the monitor does not evict a worker that keeps beating.
    pub async fn heartbeat(&self, worker_id: &str) -> ServiceResult<HeartbeatRecord> {
        self.heartbeat_at(worker_id, crate::cache::entry::unix_millis()).await
    }

    pub(crate) async fn heartbeat_at(&self, worker_id: &str, timestamp: u64) -> ServiceResult<HeartbeatRecord> {
        let registered = self
            .registry
            .get(worker_id)
            .ok_or_else(|| ServiceError::Validation(format!("unknown worker: {}", worker_id)))?;

        let record = match self.heartbeats.beat_at(worker_id, timestamp).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(worker = %worker_id, error = %e, "Heartbeat not stored, keeping it locally");
                HeartbeatRecord {
                    worker_id: worker_id.to_string(),
                    timestamp,
                }
            }
        };
        registered.descriptor.record_heartbeat(record.timestamp);
        if registered.descriptor.set_health(WorkerHealth::Healthy) != WorkerHealth::Healthy {
            tracing::info!(worker = %worker_id, "Worker healthy (heartbeat)");
        }
        Ok(record)
    }

    pub async fn deregister(&self, worker_id: &str) -> Option<Arc<WorkerDescriptor>> {
        let removed = self.registry.deregister(worker_id)?;
        if let Err(e) = self.heartbeats.clear(worker_id).await {
            tracing::debug!(worker = %worker_id, error = %e, "Heartbeat cleanup failed");
        }
        Some(removed)
    }

    /// Refresh and aggregate worker health.
    pub async fn agent_status(&self) -> HealthReport {
        self.monitor.check_all().await
    }

    /// Last aggregated health without touching the store.
    pub fn current_health(&self) -> HealthReport {
        self.monitor.current()
    }

    /// Readiness: the shared store must be reachable.
    pub async fn readiness(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Apply the hot-reloadable part of a new configuration.
    pub fn apply_config(&self, config: &OrchestratorConfig) {
        self.metrics.set_thresholds(config.metrics.alerts.clone());
    }

    /// Dispatch one operation: cache, then `Retry(Breaker(call))`, then metrics.
    pub async fn dispatch(&self, capability: &str, arguments: Value) -> ServiceResult<DispatchOutcome> {
        self.dispatch_within(capability, arguments, None).await
    }

    /// [`Orchestrator::dispatch`] that must settle, retries included, by
    /// `deadline`. An elapsed deadline is recorded as a failed request and
    /// returned as [`ServiceError::Timeout`].
    pub async fn dispatch_within(
        &self,
        capability: &str,
        arguments: Value,
        deadline: Option<Instant>,
    ) -> ServiceResult<DispatchOutcome> {
        let started = Instant::now();
        let (registered, declared) = self.registry.resolve(capability)?;
        let worker_id = registered.descriptor.id.as_str();

        let cache_entry = match &self.cache {
            Some(cache) if declared.cacheable => Some((cache, cache_key(capability, &arguments))),
            _ => None,
        };

        if let Some((cache, key)) = &cache_entry {
            let lookup = match deadline {
                Some(at) => tokio::time::timeout_at(at, cache.get_with_metadata(key)).await.unwrap_or_default(),
                None => cache.get_with_metadata(key).await,
            };
            if let Some(hit) = lookup {
                self.metrics.record_cache_hit();
                tracing::debug!(worker = %worker_id, capability = %capability, "Cache hit");
                return Ok(DispatchOutcome {
                    value: hit.value,
                    worker: worker_id.to_string(),
                    cached: true,
                    cache_age_ms: Some(hit.age.as_millis() as u64),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            self.metrics.record_cache_miss();
        }

        let idempotency = if declared.idempotent {
            Idempotency::Idempotent
        } else {
            Idempotency::NonIdempotent
        };

        let breaker = self.breakers.get(worker_id);
        let retry_metrics = self.metrics.clone();
        let retry_worker = worker_id.to_string();
        let client = self.retry.clone().on_attempt(move |report| {
            if report.next_delay.is_some() {
                retry_metrics.record_retry_attempt(&retry_worker);
            }
        });

        let worker = &registered.worker;
        let breaker = &breaker;
        let in_flight = &AtomicBool::new(false);
        let attempts = client.execute(idempotency, |attempt| {
            let arguments = arguments.clone();
            async move {
                tracing::debug!(worker = %worker_id, capability = %capability, attempt, "Invoking worker");
                in_flight.store(true, Ordering::Relaxed);
                let result = breaker
                    .call(|| with_timeout(self.call_timeout, worker.invoke(capability, arguments)))
                    .await;
                in_flight.store(false, Ordering::Relaxed);
                if !matches!(result, Err(ServiceError::BreakerOpen { .. })) {
                    let answered = match &result {
                        Ok(_) => true,
                        Err(e) => !e.counts_as_dependency_failure(),
                    };
                    self.metrics.record_dependency_call(worker_id, answered);
                }
                result
            }
        });

        let result = match deadline {
            Some(at) => match tokio::time::timeout_at(at, attempts).await {
                Ok(result) => result,
                Err(_) => {
                    // the attempt cut off by the deadline never answered
                    if in_flight.load(Ordering::Relaxed) {
                        self.metrics.record_dependency_call(worker_id, false);
                    }
                    Err(ServiceError::Timeout(at.saturating_duration_since(started)))
                }
            },
            None => attempts.await,
        };

        let elapsed = started.elapsed();
        self.metrics
            .record_worker_request(worker_id, capability, result.is_ok(), elapsed);
        self.metrics.record_metric(
            "tideway_capability_latency_ms",
            elapsed.as_micros() as f64 / 1_000.0,
            MetricType::Histogram,
            Labels::from([("capability".to_string(), capability.to_string())]),
        );

        match result {
            Ok(value) => {
                if let Some((cache, key)) = &cache_entry {
                    cache.set(key, value.clone(), declared.ttl).await;
                }
                Ok(DispatchOutcome {
                    value,
                    worker: worker_id.to_string(),
                    cached: false,
                    cache_age_ms: None,
                    duration_ms: elapsed.as_millis() as u64,
                })
            }
            Err(e) => {
                tracing::warn!(
                    worker = %worker_id,
                    capability = %capability,
                    code = e.code(),
                    error = %e,
                    "Dispatch failed"
                );
                Err(e)
            }
        }
    }

    /// [`Orchestrator::dispatch`] plus a `dispatched` progress event.
    pub async fn dispatch_request(
        &self,
        capability: &str,
        arguments: Value,
    ) -> (String, ServiceResult<DispatchOutcome>) {
        let request_id = Uuid::new_v4().to_string();
        let result = self.dispatch(capability, arguments).await;

        let (status, payload) = match &result {
            Ok(outcome) => (
                "success",
                json!({ "tool": capability, "worker": outcome.worker, "cached": outcome.cached }),
            ),
            Err(e) => ("failure", json!({ "tool": capability, "code": e.code() })),
        };
        self.events
            .publish(ProgressEvent::new(EventType::Dispatched, request_id.clone(), status).with_payload(payload));

        (request_id, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::{BreakerConfig, RetryConfig};
    use crate::registry::{CapabilitySpec, HandlerWorker};
    use crate::resilience::BreakerState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            retries: RetryConfig {
                max_retries: 2,
                base_delay_ms: 10,
                max_delay_ms: 50,
                jitter: false,
                ..RetryConfig::default()
            },
            breaker: BreakerConfig {
                minimum_calls: 3,
                window_size: 10,
                ..BreakerConfig::default()
            },
            ..OrchestratorConfig::default()
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(&config(), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_unknown_capability_is_validation_error() {
        let orchestrator = orchestrator();
        let result = orchestrator.dispatch("tide_height", json!({})).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cacheable_results_are_served_from_cache() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let worker = HandlerWorker::new("tides").handler("tide_height", move |args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "station": args["station"], "height": 1.4 }))
            }
        });
        orchestrator
            .register_local(
                Arc::new(worker),
                vec![Capability::new("tide_height").cacheable(Some(Duration::from_secs(60)))],
            )
            .await
            .unwrap();

        let first = orchestrator.dispatch("tide_height", json!({"station": "8443970"})).await.unwrap();
        let second = orchestrator.dispatch("tide_height", json!({"station": "8443970"})).await.unwrap();
        let other = orchestrator.dispatch("tide_height", json!({"station": "8447930"})).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.value, second.value);
        assert!(!other.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.metrics().cache_hits(), 1);
        assert_eq!(orchestrator.metrics().cache_misses(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let worker = HandlerWorker::new("weather").handler("forecast", move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Transient("503".into()))
                } else {
                    Ok(json!("fair"))
                }
            }
        });
        orchestrator
            .register_local(Arc::new(worker), vec![Capability::new("forecast")])
            .await
            .unwrap();

        let outcome = orchestrator.dispatch("forecast", json!({})).await.unwrap();
        assert_eq!(outcome.value, json!("fair"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let deps = orchestrator.metrics().dependency_stats();
        assert_eq!(deps[0].calls, 3);
        assert_eq!(deps[0].failures, 2);
        let workers = orchestrator.metrics().worker_stats();
        assert_eq!((workers[0].requests, workers[0].failures), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_idempotent_is_attempted_once() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let worker = HandlerWorker::new("reports").handler("submit", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient("reset".into()))
            }
        });
        orchestrator
            .register_local(Arc::new(worker), vec![Capability::new("submit").non_idempotent()])
            .await
            .unwrap();

        let result = orchestrator.dispatch("submit", json!({})).await;
        assert!(matches!(result, Err(ServiceError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_fails_fast() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let worker = HandlerWorker::new("stormglass").handler("swell", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient("upstream down".into()))
            }
        });
        orchestrator
            .register_local(Arc::new(worker), vec![Capability::new("swell")])
            .await
            .unwrap();

        // three attempts trip the breaker (minimum_calls = 3, all failed)
        let first = orchestrator.dispatch("swell", json!({})).await.unwrap_err();
        assert_eq!(first.code(), "TRANSIENT");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orchestrator.breakers().get("stormglass").state(), BreakerState::Open);

        let second = orchestrator.dispatch("swell", json!({})).await.unwrap_err();
        assert_eq!(second.code(), "BREAKER_OPEN");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(orchestrator
            .metrics()
            .check_alerts()
            .iter()
            .any(|a| a == "circuit breaker stormglass is open"));
    }

    #[tokio::test]
    async fn test_dispatch_request_publishes_event() {
        let orchestrator = orchestrator();
        let worker = HandlerWorker::new("routing").handler("bearing", |_| async { Ok(json!(90)) });
        orchestrator
            .register_local(Arc::new(worker), vec![Capability::new("bearing")])
            .await
            .unwrap();

        let mut events = orchestrator.events().subscribe();
        let (request_id, result) = orchestrator.dispatch_request("bearing", json!({})).await;
        assert!(result.is_ok());

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Dispatched);
        assert_eq!(event.request_id, Some(request_id));
        assert_eq!(event.status, "success");
    }

    #[tokio::test]
    async fn test_heartbeat_and_deregister() {
        let orchestrator = orchestrator();
        let worker = HandlerWorker::new("routing").handler("bearing", |_| async { Ok(json!(90)) });
        orchestrator
            .register_local(Arc::new(worker), vec![Capability::new("bearing")])
            .await
            .unwrap();

        assert!(orchestrator.heartbeat("routing").await.is_ok());
        assert!(matches!(
            orchestrator.heartbeat("nobody").await,
            Err(ServiceError::Validation(_))
        ));

        let report = orchestrator.agent_status().await;
        assert_eq!(report.total, 1);
        assert_eq!(report.agents[0].status, WorkerHealth::Healthy);

        assert!(orchestrator.deregister("routing").await.is_some());
        assert!(orchestrator.dispatch("bearing", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_during_store_outage_prevents_eviction() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(&config(), store.clone());
        let descriptor = orchestrator
            .register_remote(Registration {
                id: "buoys".into(),
                capabilities: vec![CapabilitySpec::Name("wave_height".into())],
                health_endpoint: None,
                endpoint: Some("http://127.0.0.1:9/invoke".into()),
            })
            .await
            .unwrap();
        let registered_at = descriptor.last_heartbeat_ms().unwrap();

        store.set_available(false);
        let record = orchestrator
            .heartbeat_at("buoys", registered_at + 200_000)
            .await
            .unwrap();
        assert_eq!(record.timestamp, registered_at + 200_000);

        // eviction is 300s; the last heartbeat is only 200s old
        let report = orchestrator.monitor.check_at(registered_at + 400_000).await;
        assert!(report.evicted.is_empty());
        assert!(orchestrator.registry().get("buoys").is_some());

        let report = orchestrator.monitor.check_at(registered_at + 600_000).await;
        assert_eq!(report.evicted, vec!["buoys".to_string()]);
    }
}
