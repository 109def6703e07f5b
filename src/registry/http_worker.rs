//! Remote worker reached over HTTP.
//!
//! # Wire Contract
//! ```text
//! POST {endpoint}  {"tool": "<capability>", "arguments": {...}}
//!     2xx → {"success": true, "result": ...}      (or any bare JSON value)
//!         → {"success": false, "error": {code, message}}
//!     429 → RateLimited (Retry-After seconds honored)
//!     400/422 → Validation, other 4xx → Permanent, 5xx → Transient
//!     connect/IO failure → Transient
//!
//! GET {healthEndpoint} → any 2xx is alive
//! ```

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::error::{ServiceError, ServiceResult};
use crate::registry::descriptor::Registration;
use crate::registry::worker::Worker;

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

pub struct HttpWorker {
    id: String,
    endpoint: Uri,
    health_endpoint: Option<Uri>,
    client: Client<HttpConnector, Body>,
    probe_timeout: Duration,
}

impl HttpWorker {
    pub fn new(
        id: impl Into<String>,
        endpoint: &str,
        health_endpoint: Option<&str>,
        probe_timeout: Duration,
    ) -> ServiceResult<Self> {
        let endpoint = parse_http_uri(endpoint)?;
        let health_endpoint = health_endpoint.map(parse_http_uri).transpose()?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            id: id.into(),
            endpoint,
            health_endpoint,
            client,
            probe_timeout,
        })
    }

    pub fn from_registration(registration: &Registration, probe_timeout: Duration) -> ServiceResult<Self> {
        let endpoint = invocation_endpoint(registration)?;
        Self::new(
            registration.id.clone(),
            &endpoint,
            registration.health_endpoint.as_deref(),
            probe_timeout,
        )
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, capability: &str, arguments: Value) -> ServiceResult<Value> {
        let payload = json!({ "tool": capability, "arguments": arguments });
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "tideway")
            .body(Body::from(payload.to_string()))
            .map_err(|e| ServiceError::Permanent(format!("failed to build request: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ServiceError::Transient(format!("worker {} unreachable: {}", self.id, e)))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| ServiceError::Transient(format!("worker {} response body: {}", self.id, e)))?;

        if !status.is_success() {
            let message = error_message(&bytes)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            tracing::debug!(worker = %self.id, status = %status, "Worker returned error status");
            return Err(ServiceError::from_status(status.as_u16(), message, retry_after));
        }

        decode_success(&bytes)
    }

    async fn probe(&self) -> bool {
        let Some(uri) = &self.health_endpoint else {
            return true;
        };

        let request = match Request::builder()
            .method(Method::GET)
            .uri(uri.clone())
            .header(header::USER_AGENT, "tideway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(worker = %self.id, error = %e, "Failed to build probe request");
                return false;
            }
        };

        match tokio::time::timeout(self.probe_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let alive = response.status().is_success();
                if !alive {
                    tracing::warn!(worker = %self.id, status = %response.status(), "Probe failed: non-success status");
                }
                alive
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = %self.id, error = %e, "Probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(worker = %self.id, "Probe failed: timeout");
                false
            }
        }
    }
}

/// The endpoint to invoke: explicit, or `/invoke` on the health endpoint's host.
pub fn invocation_endpoint(registration: &Registration) -> ServiceResult<String> {
    if let Some(endpoint) = &registration.endpoint {
        return Ok(endpoint.clone());
    }
    let health = registration.health_endpoint.as_deref().ok_or_else(|| {
        ServiceError::Validation(format!(
            "worker {} needs an endpoint or a healthEndpoint",
            registration.id
        ))
    })?;
    let base = Url::parse(health)
        .map_err(|e| ServiceError::Validation(format!("invalid healthEndpoint {}: {}", health, e)))?;
    base.join("/invoke")
        .map(String::from)
        .map_err(|e| ServiceError::Validation(format!("invalid healthEndpoint {}: {}", health, e)))
}

fn parse_http_uri(raw: &str) -> ServiceResult<Uri> {
    let uri: Uri = raw
        .parse()
        .map_err(|e| ServiceError::Validation(format!("invalid endpoint {}: {}", raw, e)))?;
    if uri.scheme_str() != Some("http") || uri.authority().is_none() {
        return Err(ServiceError::Validation(format!(
            "endpoint {} must be an absolute http:// URL",
            raw
        )));
    }
    Ok(uri)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn error_message(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(body) => match &body["error"] {
            Value::String(message) => Some(message.clone()),
            Value::Object(error) => error.get("message").and_then(Value::as_str).map(str::to_string),
            _ => body["message"].as_str().map(str::to_string),
        },
        Err(_) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
    }
}

fn decode_success(bytes: &[u8]) -> ServiceResult<Value> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    let body: Value = serde_json::from_slice(bytes)
        .map_err(|e| ServiceError::Permanent(format!("worker returned invalid JSON: {}", e)))?;

    match body.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(body.get("result").cloned().unwrap_or(Value::Null)),
        Some(false) => {
            let code = body["error"]["code"].as_str().unwrap_or("TRANSIENT");
            let message = body["error"]["message"].as_str().unwrap_or("worker reported failure");
            Err(ServiceError::from_code(code, message))
        }
        None => Ok(body),
    }
}
