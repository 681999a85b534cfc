//! Deterministic model stub for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm_client::{LlmError, ModelCapability, ModelRequest, OutputSchema};

pub const TEST_SCHEMA: OutputSchema = OutputSchema {
    name: "test_schema",
    shape: "{}",
};

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Timeout,
    Provider,
    /// Never answers; used to exercise timeouts and cancellation.
    Hang,
}

/// Replays scripted answers per schema name. The last scripted answer for a schema is
/// sticky, so identical calls keep getting identical answers.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    calls: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, schema: &'static str, value: Value) -> Self {
        self.reply_with(schema, Reply::Json(value))
    }

    pub fn reply_with(self, schema: &'static str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(schema)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<ModelRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, schema: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.schema.name == schema)
            .count()
    }

    fn next_reply(&self, schema: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(schema)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.next_reply(request.schema.name) {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Timeout) => Err(LlmError::Timeout { secs: 0 }),
            Some(Reply::Provider) => Err(LlmError::Api {
                status: 500,
                message: "scripted provider failure".to_string(),
            }),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(LlmError::Api {
                status: 500,
                message: format!("no scripted reply for {}", request.schema.name),
            }),
        }
    }
}
