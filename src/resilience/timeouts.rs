//! Timeout enforcement.
//!
//! Every worker call and every plan branch runs under a deadline. Elapsed
//! deadlines become [`ServiceError::Timeout`], which the retry layer treats as
//! transient and the plan layer reports as an `Unavailable` section.

use std::future::Future;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Run `future` with a deadline. The future is dropped when the deadline elapses.
pub async fn with_timeout<T, F>(limit: Duration, future: F) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(limit)),
    }
}
