//! End-to-end run: cache → analyze → map → iteration controller → package.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{get_json, mapping_key, parsed_jd_key, put_json, PipelineCache};
use crate::config::PipelineConfig;
use crate::knowledge::KnowledgeBase;
use crate::llm_client::guard::GuardedModel;
use crate::llm_client::ModelCapability;
use crate::models::jd::JdRecord;
use crate::models::mapping::MappingMatrix;
use crate::models::resume::ReframingLogEntry;
use crate::models::score::{ScoreComponent, ScoreWeights};
use crate::pipeline::cancel::RunCancellation;
use crate::pipeline::controller::{run_controller, Attempt, PipelineMode, StageRunner};
use crate::pipeline::format_checker::{check_format, repair_presentation, standard_presentation};
use crate::pipeline::jd_analyzer::analyze_jd;
use crate::pipeline::keyword_optimizer::{apply_keyword_patch, audit_keywords};
use crate::pipeline::package::{assemble_package, gate_failures, ResumePackage};
use crate::pipeline::preferences::{load_recent_edits, EditPreferences, MAX_EDIT_EVENTS};
use crate::pipeline::profile_mapper::map_profile;
use crate::pipeline::reframer::{patch_component, reframe, ReframeFeedback, ReframeOutput};
use crate::pipeline::rules::lint_draft;
use crate::pipeline::scorer::score;
use crate::pipeline::{PipelineError, RunContext};

/// Shared collaborators of every run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub model: Arc<dyn ModelCapability>,
    pub kb: Arc<dyn KnowledgeBase>,
    pub cache: Arc<dyn PipelineCache>,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub jd_text: String,
    pub mode: PipelineMode,
    pub use_cache: bool,
}

pub async fn run_pipeline(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    request: RunRequest,
    cancel: RunCancellation,
) -> Result<ResumePackage, PipelineError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id, mode = %request.mode);
    execute(run_id, deps, config, request, cancel).instrument(span).await
}

async fn execute(
    run_id: Uuid,
    deps: &PipelineDeps,
    config: &PipelineConfig,
    request: RunRequest,
    cancel: RunCancellation,
) -> Result<ResumePackage, PipelineError> {
    if request.jd_text.trim().is_empty() {
        return Err(PipelineError::InvalidInput("job description text is empty".to_string()));
    }
    let deadline = Instant::now() + config.controller.latency_budget;
    let model = GuardedModel::new(deps.model.clone(), config.llm_call_timeout, cancel.clone());
    let kb = deps.kb.as_ref();
    let cache = request.use_cache.then_some(deps.cache.as_ref());
    info!("Run started (kb {}, cache {})", kb.version(), cache.is_some());

    checkpoint(&cancel)?;
    let jd: JdRecord = cached(cache, &parsed_jd_key(&request.jd_text), || analyze_jd(&model, &request.jd_text)).await?;

    checkpoint(&cancel)?;
    let mapping: MappingMatrix = cached(cache, &mapping_key(&request.jd_text, kb.version()), || {
        map_profile(&model, &jd, kb)
    })
    .await?;

    checkpoint(&cancel)?;
    let preferences = load_preferences(config.edit_log_path.as_deref()).await;
    let stages = PipelineStages {
        ctx: RunContext {
            model: &model,
            kb,
            jd: &jd,
            mapping: &mapping,
            preferences: preferences.as_ref(),
        },
        weights: config.controller.weights,
        log: Mutex::new(Vec::new()),
    };
    let outcome = run_controller(&stages, request.mode, &config.controller, &cancel, deadline).await?;

    checkpoint(&cancel)?;
    assemble_package(
        run_id,
        request.mode,
        outcome,
        stages.into_log(),
        mapping.coverage_summary.clone(),
        kb,
        &jd,
    )
}

/// An unreadable edit log costs the run its preferences, never the run itself.
async fn load_preferences(path: Option<&std::path::Path>) -> Option<EditPreferences> {
    let path = path?;
    match load_recent_edits(path, MAX_EDIT_EVENTS).await {
        Ok(edits) => Some(EditPreferences::from_edits(&edits)).filter(|p| !p.is_empty()),
        Err(e) => {
            warn!("Edit preferences unavailable: {e}");
            None
        }
    }
}

fn checkpoint(cancel: &RunCancellation) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        info!("Run cancelled at stage boundary");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Cache-through for a stage result. Cache trouble only ever costs a recomputation.
async fn cached<T, F, Fut>(cache: Option<&dyn PipelineCache>, key: &str, compute: F) -> Result<T, PipelineError>
where
    T: Serialize + DeserializeOwned + Sync,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let Some(cache) = cache else {
        return compute().await;
    };
    if let Some(hit) = get_json::<T>(cache, key).await {
        debug!("Cache hit for {key}");
        return Ok(hit);
    }
    let value = compute().await?;
    put_json(cache, key, &value).await;
    Ok(value)
}

// ────────────────────────────────────────────────────────────────────────────
// Stage runner
// ────────────────────────────────────────────────────────────────────────────

/// The real reframe → optimize → format → score stages. Accumulates the run's reframing
/// log across every attempt, including ones the controller later discards.
struct PipelineStages<'a> {
    ctx: RunContext<'a>,
    weights: ScoreWeights,
    log: Mutex<Vec<ReframingLogEntry>>,
}

impl PipelineStages<'_> {
    fn into_log(self) -> Vec<ReframingLogEntry> {
        self.log.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn evaluate(&self, out: ReframeOutput) -> Result<Attempt, PipelineError> {
        let RunContext { model, kb, jd, .. } = self.ctx;
        let keywords = audit_keywords(&out.draft, jd, kb);
        let format = check_format(&out.draft);
        let score = score(model, &out.draft, jd, &keywords, &format, &self.weights).await?;

        match self.log.lock() {
            Ok(mut log) => log.extend(out.log.iter().cloned()),
            Err(poisoned) => poisoned.into_inner().extend(out.log.iter().cloned()),
        }
        Ok(Attempt {
            draft: out.draft,
            log: out.log,
            violations: out.violations,
            keywords,
            format,
            score,
        })
    }
}

#[async_trait]
impl<'a> StageRunner for PipelineStages<'a> {
    async fn draft(&self, feedback: Option<&ReframeFeedback>) -> Result<Attempt, PipelineError> {
        let out = reframe(self.ctx, feedback).await?;
        self.evaluate(out).await
    }

    async fn patch(&self, previous: &Attempt, focus: ScoreComponent) -> Result<Attempt, PipelineError> {
        let RunContext { kb, jd, .. } = self.ctx;
        let out = match focus {
            ScoreComponent::KeywordMatch => apply_keyword_patch(self.ctx, &previous.draft, &previous.keywords).await?,
            ScoreComponent::FormatCompliance => {
                let standard = standard_presentation(
                    kb.candidate(),
                    jd,
                    !kb.education().is_empty(),
                    !kb.certifications().is_empty(),
                );
                let repair = repair_presentation(&previous.draft, &standard);
                let violations = lint_draft(&repair.draft, kb, jd);
                ReframeOutput {
                    draft: repair.draft,
                    log: repair.log,
                    violations,
                }
            }
            ScoreComponent::AchievementDensity
            | ScoreComponent::SemanticAlignment
            | ScoreComponent::HumanReadability => patch_component(self.ctx, &previous.draft, focus).await?,
        };
        self.evaluate(out).await
    }

    fn admissible(&self, attempt: &Attempt) -> bool {
        let RunContext { kb, jd, .. } = self.ctx;
        let failures = match self.log.lock() {
            Ok(log) => gate_failures(&attempt.draft, &log, kb, jd).1,
            Err(poisoned) => gate_failures(&attempt.draft, &poisoned.into_inner(), kb, jd).1,
        };
        if !failures.is_empty() {
            debug!("Attempt fails the gate: {}", failures.join("; "));
        }
        failures.is_empty()
    }
}
