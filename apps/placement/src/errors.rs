use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::PipelineError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Pipeline(err) => match err {
                PipelineError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
                PipelineError::Extraction { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "EXTRACTION_FAILED",
                    err.to_string(),
                ),
                PipelineError::Mapping(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MAPPING_FAILED", err.to_string()),
                PipelineError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", err.to_string()),
                PipelineError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "CANCELLED", err.to_string()),
                PipelineError::Provider { .. } => {
                    tracing::error!("Model provider error: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "PROVIDER_ERROR",
                        "The language model provider failed".to_string(),
                    )
                }
                PipelineError::GroundednessGate { .. } => {
                    tracing::error!("Groundedness gate failure: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "GROUNDEDNESS_GATE",
                        err.to_string(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
