//! Schema-validated extraction: every model result is deserialized and checked before
//! it is trusted, with exactly one repair re-prompt.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm_client::prompts::REPAIR_TEMPLATE;
use crate::llm_client::{LlmError, LlmErrorKind, ModelCapability, ModelRequest};

/// The model output failed validation after the repair attempt.
#[derive(Debug, Clone, Error)]
#[error("`{schema}` output failed validation after repair: {}", .issues.join("; "))]
pub struct ExtractionError {
    pub schema: &'static str,
    pub issues: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Invalid(#[from] ExtractionError),

    #[error(transparent)]
    Model(#[from] LlmError),
}

/// Domain validation run after deserialization succeeds.
pub trait SchemaCheck {
    fn schema_issues(&self) -> Vec<String> {
        Vec::new()
    }
}

impl ModelRequest {
    /// The same request with the previous validation issues appended.
    pub fn with_repair(&self, issues: &[String]) -> ModelRequest {
        let issues = issues
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        ModelRequest {
            system: self.system.clone(),
            prompt: format!(
                "{}\n\n{}",
                self.prompt,
                REPAIR_TEMPLATE.replace("{issues}", &issues)
            ),
            schema: self.schema,
        }
    }
}

pub async fn extract<T>(model: &dyn ModelCapability, request: &ModelRequest) -> Result<T, ExtractError>
where
    T: DeserializeOwned + SchemaCheck,
{
    extract_with(model, request, |value: &T| value.schema_issues()).await
}

/// Like `extract`, with caller-supplied validation that needs run context
/// (known fact ids, role ids...).
pub async fn extract_with<T, F>(
    model: &dyn ModelCapability,
    request: &ModelRequest,
    validate: F,
) -> Result<T, ExtractError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Vec<String>,
{
    let issues = match attempt(model, request, &validate).await? {
        Ok(value) => return Ok(value),
        Err(issues) => issues,
    };

    warn!(
        schema = request.schema.name,
        "model output rejected ({} issues), sending repair prompt",
        issues.len()
    );
    let repair = request.with_repair(&issues);

    match attempt(model, &repair, &validate).await? {
        Ok(value) => {
            debug!(schema = request.schema.name, "repair attempt succeeded");
            Ok(value)
        }
        Err(issues) => Err(ExtractionError {
            schema: request.schema.name,
            issues,
        }
        .into()),
    }
}

/// One call. The outer error is a capability failure; the inner one lists
/// validation issues to feed into a repair prompt.
async fn attempt<T, F>(
    model: &dyn ModelCapability,
    request: &ModelRequest,
    validate: &F,
) -> Result<Result<T, Vec<String>>, LlmError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Vec<String>,
{
    let raw = match model.invoke(request).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == LlmErrorKind::SchemaValidation => return Ok(Err(vec![e.to_string()])),
        Err(e) => return Err(e),
    };

    let value: T = match serde_json::from_value(raw) {
        Ok(value) => value,
        Err(e) => return Ok(Err(vec![format!("output does not match schema: {e}")])),
    };

    let issues = validate(&value);
    if issues.is_empty() {
        Ok(Ok(value))
    } else {
        Ok(Err(issues))
    }
}
