//! The resume pipeline: parse → map → reframe → optimize → format → score, with the
//! terminal stages looped by the iteration controller.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::knowledge::KnowledgeBase;
use crate::llm_client::extractor::{ExtractError, ExtractionError};
use crate::llm_client::{LlmError, LlmErrorKind, ModelCapability};
use crate::models::jd::JdRecord;
use crate::models::mapping::MappingMatrix;
use crate::pipeline::preferences::EditPreferences;

pub mod cancel;
pub mod controller;
pub mod format_checker;
pub mod handlers;
pub mod jd_analyzer;
pub mod keyword_optimizer;
pub mod orchestrator;
pub mod package;
pub mod preferences;
pub mod profile_mapper;
pub mod prompts;
pub mod reframer;
pub mod rules;
pub mod scorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    JdAnalysis,
    Mapping,
    Reframe,
    KeywordPatch,
    Scoring,
    Packaging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::JdAnalysis => "jd_analysis",
            Stage::Mapping => "mapping",
            Stage::Reframe => "reframe",
            Stage::KeywordPatch => "keyword_patch",
            Stage::Scoring => "scoring",
            Stage::Packaging => "packaging",
        };
        f.write_str(s)
    }
}

/// Run-level failures. Structural errors abort the run; `Timeout` is recoverable inside
/// the controller loop and only surfaces when it hits a stage outside the loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{stage} extraction failed: {source}")]
    Extraction {
        stage: Stage,
        #[source]
        source: ExtractionError,
    },

    #[error("mapping failed: {0}")]
    Mapping(String),

    #[error("{stage} timed out")]
    Timeout { stage: Stage },

    #[error("model provider failed during {stage}: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("final draft failed the groundedness gate: {}", .violations.join("; "))]
    GroundednessGate { violations: Vec<String> },
}

impl PipelineError {
    pub fn from_llm(stage: Stage, err: LlmError) -> Self {
        match err.kind() {
            LlmErrorKind::Timeout => PipelineError::Timeout { stage },
            LlmErrorKind::Cancelled => PipelineError::Cancelled,
            LlmErrorKind::SchemaValidation | LlmErrorKind::Provider => {
                PipelineError::Provider { stage, source: err }
            }
        }
    }

    pub fn from_extract(stage: Stage, err: ExtractError) -> Self {
        match err {
            ExtractError::Invalid(source) => PipelineError::Extraction { stage, source },
            ExtractError::Model(e) => PipelineError::from_llm(stage, e),
        }
    }

    /// Timeouts are absorbed by the controller like a low-confidence result.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}

/// Read-only inputs shared by every stage after mapping.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub model: &'a dyn ModelCapability,
    pub kb: &'a dyn KnowledgeBase,
    pub jd: &'a JdRecord,
    pub mapping: &'a MappingMatrix,
    /// Past hand corrections to steer the reframer; `None` when there are none.
    pub preferences: Option<&'a EditPreferences>,
}
