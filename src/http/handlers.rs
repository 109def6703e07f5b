//! Route handlers.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::entry::unix_millis;
use crate::error::ServiceError;
use crate::http::response::{ApiError, Envelope};
use crate::http::server::AppState;
use crate::orchestrator::{PlanRequest, PlanStatus};
use crate::registry::Registration;

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Liveness with a summary of every subsystem.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    let report = orchestrator.current_health();
    let store = match orchestrator.readiness().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    let breakers = orchestrator.breakers();

    Json(json!({
        "status": report.status,
        "timestamp": unix_millis(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "store": store,
            "workers": {
                "status": report.status,
                "healthy": report.healthy,
                "total": report.total,
            },
            "breakers": {
                "open": breakers.open_count(),
                "total": breakers.len(),
            },
        },
    }))
}

/// Readiness: 503 while the shared store is unreachable.
pub async fn ready(State(state): State<AppState>) -> Response {
    match state.orchestrator.readiness().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ready": true }))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.orchestrator.metrics().render(),
    )
}

pub async fn alerts(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "alerts": state.orchestrator.metrics().check_alerts() }))
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.orchestrator.metrics();
    Json(json!({
        "workers": metrics.worker_stats(),
        "dependencies": metrics.dependency_stats(),
        "cache": {
            "hits": metrics.cache_hits(),
            "misses": metrics.cache_misses(),
        },
    }))
}

pub async fn agents_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.agent_status().await)
}

pub async fn breakers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "breakers": state.orchestrator.breakers().snapshots() }))
}

pub async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<Envelope>, ApiError> {
    let (request_id, result) = state
        .orchestrator
        .dispatch_request(&request.tool, request.arguments)
        .await;
    let outcome = result?;

    tracing::debug!(
        request_id = %request_id,
        tool = %request.tool,
        worker = %outcome.worker,
        cached = outcome.cached,
        "Dispatch served"
    );
    Ok(Json(Envelope::ok(outcome.value)))
}

/// 200 for COMPLETE and PARTIAL, 502 with the same body when every branch failed.
pub async fn plan(
    State(state): State<AppState>,
    Json(request): Json<PlanRequest>,
) -> Result<Response, ApiError> {
    let plan = state.orchestrator.run_plan(request).await?;
    let status = match plan.status {
        PlanStatus::Failed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    Ok((status, Json(plan)).into_response())
}

pub async fn register_worker(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> Result<Response, ApiError> {
    let descriptor = state.orchestrator.register_remote(registration).await?;
    Ok((StatusCode::CREATED, Json(descriptor.status())).into_response())
}

pub async fn heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.heartbeat(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(ServiceError::Validation(message)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn deregister_worker(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.orchestrator.deregister(&id).await {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}
