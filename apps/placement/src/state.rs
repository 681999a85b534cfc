use std::sync::Arc;

use crate::cache::PipelineCache;
use crate::config::Config;
use crate::knowledge::KnowledgeBase;
use crate::llm_client::ModelCapability;
use crate::pipeline::orchestrator::PipelineDeps;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn ModelCapability>,
    /// Read-only for the life of the process.
    pub kb: Arc<dyn KnowledgeBase>,
    /// Redis when `REDIS_URL` is set, in-process memory otherwise.
    pub cache: Arc<dyn PipelineCache>,
    pub config: Config,
}

impl AppState {
    pub fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            model: self.model.clone(),
            kb: self.kb.clone(),
            cache: self.cache.clone(),
        }
    }
}
