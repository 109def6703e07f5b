//! Worker abstraction and the in-process implementation.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};

/// Something that performs capabilities on behalf of the orchestrator.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this worker can run `capability`. Checked at registration.
    fn handles(&self, _capability: &str) -> bool {
        true
    }

    async fn invoke(&self, capability: &str, arguments: Value) -> ServiceResult<Value>;

    /// Active liveness probe. Workers without one are assumed alive.
    async fn probe(&self) -> bool {
        true
    }
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, ServiceResult<Value>> + Send + Sync>;

/// Worker backed by async closures, one per capability.
#[derive(Clone)]
pub struct HandlerWorker {
    id: String,
    handlers: HashMap<String, Handler>,
}

impl HandlerWorker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `capability`.
    pub fn handler<F, Fut>(mut self, capability: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |arguments| handler(arguments).boxed());
        self.handlers.insert(capability.into(), handler);
        self
    }

    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Worker for HandlerWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn handles(&self, capability: &str) -> bool {
        self.handlers.contains_key(capability)
    }

    async fn invoke(&self, capability: &str, arguments: Value) -> ServiceResult<Value> {
        let handler = self.handlers.get(capability).ok_or_else(|| {
            ServiceError::Validation(format!("worker {} has no handler for {}", self.id, capability))
        })?;
        handler(arguments).await
    }
}
