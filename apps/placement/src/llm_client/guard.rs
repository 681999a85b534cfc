use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::llm_client::{LlmError, ModelCapability, ModelRequest};
use crate::pipeline::cancel::RunCancellation;

/// Bounds every model call with the per-call timeout and races it against the run's
/// cancellation signal. The pipeline only ever talks to the model through this wrapper.
#[derive(Clone)]
pub struct GuardedModel {
    inner: Arc<dyn ModelCapability>,
    timeout: Duration,
    cancel: RunCancellation,
}

impl GuardedModel {
    pub fn new(inner: Arc<dyn ModelCapability>, timeout: Duration, cancel: RunCancellation) -> Self {
        Self {
            inner,
            timeout,
            cancel,
        }
    }
}

#[async_trait]
impl ModelCapability for GuardedModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value, LlmError> {
        if self.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LlmError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.inner.invoke(request)) => match res {
                Ok(result) => result,
                Err(_) => {
                    warn!(schema = request.schema.name, "model call exceeded {:?}", self.timeout);
                    Err(LlmError::Timeout {
                        secs: self.timeout.as_secs(),
                    })
                }
            },
        }
    }
}
