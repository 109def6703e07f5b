//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router with all handlers
//! - Wire up middleware (request id, tracing, timeout, body limit)
//! - Serve until shutdown, applying hot-reloaded configuration

use axum::{
    http::{HeaderName, StatusCode},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::OrchestratorConfig;
use crate::http::{handlers, websocket};
use crate::lifecycle::Shutdown;
use crate::orchestrator::Orchestrator;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown: Shutdown,
}

/// HTTP front of the orchestrator.
pub struct HttpServer {
    router: Router,
    orchestrator: Arc<Orchestrator>,
    shutdown: Shutdown,
}

impl HttpServer {
    pub fn new(config: &OrchestratorConfig, orchestrator: Arc<Orchestrator>, shutdown: Shutdown) -> Self {
        let state = AppState {
            orchestrator: orchestrator.clone(),
            shutdown: shutdown.clone(),
        };
        let router = Self::build_router(config, state);
        Self {
            router,
            orchestrator,
            shutdown,
        }
    }

    /// Build the router with all middleware layers.
    pub fn build_router(config: &OrchestratorConfig, state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        let api = Router::new()
            .route("/health", get(handlers::health))
            .route("/ready", get(handlers::ready))
            .route("/metrics", get(handlers::metrics))
            .route("/api/alerts", get(handlers::alerts))
            .route("/api/stats", get(handlers::stats))
            .route("/api/agents/status", get(handlers::agents_status))
            .route("/api/breakers", get(handlers::breakers))
            .route("/api/dispatch", post(handlers::dispatch))
            .route("/api/plan", post(handlers::plan))
            .route("/api/workers", post(handlers::register_worker))
            .route("/api/workers/{id}", delete(handlers::deregister_worker))
            .route("/api/workers/{id}/heartbeat", post(handlers::heartbeat))
            .layer(
                ServiceBuilder::new()
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::GATEWAY_TIMEOUT,
                        Duration::from_secs(config.timeouts.request_secs),
                    )),
            );

        // the progress socket outlives any request timeout
        Router::new()
            .route("/ws", get(websocket::ws_handler))
            .merge(api)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(request_id)),
            )
    }

    /// Serve on `listener` until shutdown. Configuration updates arriving on
    /// `config_updates` are applied without a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<OrchestratorConfig>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let orchestrator = self.orchestrator.clone();
        let mut reload_shutdown = self.shutdown.subscribe();
        let reload = tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => {
                            orchestrator.apply_config(&config);
                            tracing::info!("Applied configuration update");
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        reload.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
