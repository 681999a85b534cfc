//! Axum route handlers for the Resume API.

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::errors::AppError;
use crate::pipeline::cancel::RunCancellation;
use crate::pipeline::controller::PipelineMode;
use crate::pipeline::orchestrator::{run_pipeline, RunRequest};
use crate::pipeline::package::ResumePackage;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateResumeRequest {
    pub jd_text: String,
    /// Falls back to the configured default mode.
    #[serde(default)]
    pub mode: Option<PipelineMode>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/resumes
///
/// Runs the full pipeline for one JD against the loaded knowledge base and returns the
/// resume package. A client disconnect drops the run along with its in-flight model call.
pub async fn handle_create_resume(
    State(state): State<AppState>,
    Json(request): Json<CreateResumeRequest>,
) -> Result<Json<ResumePackage>, AppError> {
    if request.jd_text.trim().is_empty() {
        return Err(AppError::Validation("jd_text cannot be empty".to_string()));
    }

    let run = RunRequest {
        jd_text: request.jd_text,
        mode: request.mode.unwrap_or(state.config.pipeline.default_mode),
        use_cache: request.use_cache,
    };
    let package = run_pipeline(
        &state.pipeline_deps(),
        &state.config.pipeline,
        run,
        RunCancellation::never(),
    )
    .await?;

    Ok(Json(package))
}
