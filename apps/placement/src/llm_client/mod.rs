/// The model capability boundary.
///
/// Pipeline stages depend on `ModelCapability` only and reach it through
/// `extractor::extract*`, which validates every result before it is trusted.
/// `AnthropicModel` is the one production implementation.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod extractor;
pub mod guard;
pub mod prompts;
#[cfg(test)]
pub mod testing;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 8192;
/// Sends per invocation, the first included.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("LLM call cancelled")]
    Cancelled,
}

/// Coarse failure categories of the model capability boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Timeout,
    SchemaValidation,
    Provider,
    Cancelled,
}

impl LlmError {
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::Timeout { .. } => LlmErrorKind::Timeout,
            LlmError::Parse(_) | LlmError::EmptyContent => LlmErrorKind::SchemaValidation,
            LlmError::Cancelled => LlmErrorKind::Cancelled,
            LlmError::Http(_) | LlmError::Api { .. } => LlmErrorKind::Provider,
        }
    }

    /// Rate limits, server errors and dropped connections are worth another send.
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_connect() || e.is_timeout(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Named description of the JSON shape a call must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSchema {
    pub name: &'static str,
    /// Example JSON document embedded in the prompt.
    pub shape: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
    pub schema: OutputSchema,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            schema,
        }
    }

    /// Full user message: the prompt followed by the schema the answer must follow.
    pub fn render(&self) -> String {
        format!(
            "{}\n\nReturn a JSON value matching the `{}` schema EXACTLY:\n{}",
            self.prompt, self.schema.name, self.schema.shape
        )
    }
}

/// The opaque model capability: given a prompt and an output schema, return structured
/// data or fail with a timeout, a schema validation failure, or a provider error.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value, LlmError>;
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReply {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// `ModelCapability` over the Anthropic Messages API. Per-call deadlines and cancellation
/// live in `guard::GuardedModel`; this layer only retries transient provider failures.
#[derive(Clone)]
pub struct AnthropicModel {
    client: Client,
    api_key: String,
}

impl AnthropicModel {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self { client, api_key })
    }

    /// One round trip, returning the first text block of the reply.
    async fn send(&self, body: &Value) -> Result<String, LlmError> {
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorReply>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: MessagesReply = response.json().await?;
        reply
            .content
            .into_iter()
            .find_map(|block| match block {
                ReplyBlock::Text { text } => Some(text),
                ReplyBlock::Other => None,
            })
            .ok_or(LlmError::EmptyContent)
    }
}

/// 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(6))
}

#[async_trait]
impl ModelCapability for AnthropicModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<Value, LlmError> {
        // Zero temperature keeps re-runs with unchanged feedback stable.
        let body = json!({
            "model": MODEL,
            "max_tokens": MAX_TOKENS,
            "temperature": 0.0,
            "system": request.system,
            "messages": [{"role": "user", "content": request.render()}],
        });

        let mut attempt = 0;
        let text = loop {
            match self.send(&body).await {
                Ok(text) => break text,
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff(attempt);
                    warn!("{} call failed ({e}); retrying in {}s", request.schema.name, delay.as_secs());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        debug!("{} call answered after {} attempt(s)", request.schema.name, attempt + 1);
        serde_json::from_str(strip_json_fences(&text)).map_err(LlmError::Parse)
    }
}

/// Strips a ```json or bare ``` fence from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```json").or_else(|| text.strip_prefix("```")) else {
        return text;
    };
    let inner = inner.trim();
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
