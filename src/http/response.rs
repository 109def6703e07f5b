//! Wire envelopes and error → status mapping.
//!
//! Every dispatch-style endpoint answers `{success, result?, error?}`:
//! ```text
//! {"success": true,  "result": {...}}
//! {"success": false, "error": {"code": "BREAKER_OPEN", "message": "..."}}
//! ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &ServiceError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// HTTP status for an error that escaped the resilience layers.
pub fn status_for(error: &ServiceError) -> StatusCode {
    match error.root() {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ServiceError::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// A [`ServiceError`] rendered as a failure envelope.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (status_for(&self.0), Json(Envelope::failure(&self.0))).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_envelope_shape() {
        assert_eq!(
            serde_json::to_value(Envelope::ok(json!({"height": 1.2}))).unwrap(),
            json!({"success": true, "result": {"height": 1.2}})
        );

        let error = ServiceError::BreakerOpen {
            dependency: "tides".into(),
        };
        let body = serde_json::to_value(Envelope::failure(&error)).unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("BREAKER_OPEN"));
        assert!(body.get("result").is_none());
    }

    #[test]
    fn test_status_mapping_looks_through_exhaustion() {
        let exhausted = ServiceError::Exhausted {
            attempts: 4,
            last: Box::new(ServiceError::Timeout(Duration::from_secs(10))),
        };
        assert_eq!(status_for(&exhausted), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&ServiceError::Validation("no such tool".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ServiceError::Permanent("status 404".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let response = ApiError(ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}
