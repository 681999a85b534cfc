//! Output package assembly and the final groundedness gate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::knowledge::KnowledgeBase;
use crate::models::jd::{JdRecord, P0Health};
use crate::models::mapping::CoverageSummary;
use crate::models::resume::{ReframingLogEntry, ResumeDraft};
use crate::models::score::ScoreReport;
use crate::pipeline::controller::{ControllerOutcome, IterationLog, PipelineMode, RunStatus};
use crate::pipeline::format_checker::FormatReport;
use crate::pipeline::keyword_optimizer::KeywordReport;
use crate::pipeline::reframer::{is_logged, is_verbatim};
use crate::pipeline::rules::{lint_draft, RuleViolation};
use crate::pipeline::PipelineError;

/// What the candidate should be ready to say about one reframed bullet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterviewPrepNote {
    pub bullet: String,
    pub original: String,
    pub note: String,
    pub metric_estimated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumePackage {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub mode: PipelineMode,
    pub generated_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub resume: ResumeDraft,
    pub score_report: ScoreReport,
    pub keyword_coverage: KeywordReport,
    pub format_report: FormatReport,
    /// Non-blocking quality findings still open on the emitted draft.
    pub open_violations: Vec<RuleViolation>,
    pub reframing_log: Vec<ReframingLogEntry>,
    pub interview_prep: Vec<InterviewPrepNote>,
    pub mapping_coverage: CoverageSummary,
    pub iteration_log: IterationLog,
}

/// Everything that would stop `draft` from being emitted, next to the full lint result.
pub fn gate_failures(
    draft: &ResumeDraft,
    log: &[ReframingLogEntry],
    kb: &dyn KnowledgeBase,
    jd: &JdRecord,
) -> (Vec<RuleViolation>, Vec<String>) {
    let violations = lint_draft(draft, kb, jd);
    let mut failures: Vec<String> = violations
        .iter()
        .filter(|v| v.is_blocking())
        .map(|v| format!("{}: {}", v.rule, v.message))
        .collect();

    for (at, _, bullet) in draft.bullets() {
        if !is_verbatim(&bullet.text, &bullet.source_fact_ids, kb) && !is_logged(&bullet.text, log) {
            failures.push(format!(
                "altered bullet {}/{} has no reframing log entry",
                at.section, at.bullet
            ));
        }
        if bullet.estimated_metric
            && !log
                .iter()
                .any(|e| e.metric_estimated && e.reframed.trim() == bullet.text.trim())
        {
            failures.push(format!(
                "estimated metric in bullet {}/{} is not disclosed in the reframing log",
                at.section, at.bullet
            ));
        }
    }
    (violations, failures)
}

/// Final invariant check on the draft about to be emitted. Any failure here is fatal.
pub fn groundedness_gate(
    draft: &ResumeDraft,
    log: &[ReframingLogEntry],
    kb: &dyn KnowledgeBase,
    jd: &JdRecord,
) -> Result<Vec<RuleViolation>, PipelineError> {
    let (violations, failures) = gate_failures(draft, log, kb, jd);
    if failures.is_empty() {
        Ok(violations)
    } else {
        error!("Groundedness gate rejected the final draft: {}", failures.join("; "));
        Err(PipelineError::GroundednessGate { violations: failures })
    }
}

/// One note per bullet in the emitted draft that has a log entry, newest entry first.
pub fn interview_prep(draft: &ResumeDraft, log: &[ReframingLogEntry]) -> Vec<InterviewPrepNote> {
    draft
        .bullets()
        .filter_map(|(_, _, bullet)| {
            log.iter()
                .rev()
                .find(|e| e.reframed.trim() == bullet.text.trim())
                .map(|e| InterviewPrepNote {
                    bullet: bullet.text.clone(),
                    original: e.original.clone(),
                    note: e.interview_note.clone(),
                    metric_estimated: e.metric_estimated,
                })
        })
        .collect()
}

fn p0_warning(jd: &JdRecord) -> Option<String> {
    match jd.p0_health {
        P0Health::Healthy => None,
        P0Health::TooFew => Some(format!("p0_too_few: {} P0 keywords extracted", jd.p0_keywords.len())),
        P0Health::OverClassified => Some(format!(
            "p0_over_classified: {} P0 keywords extracted",
            jd.p0_keywords.len()
        )),
    }
}

pub fn assemble_package(
    run_id: Uuid,
    mode: PipelineMode,
    outcome: ControllerOutcome,
    reframing_log: Vec<ReframingLogEntry>,
    mapping_coverage: CoverageSummary,
    kb: &dyn KnowledgeBase,
    jd: &JdRecord,
) -> Result<ResumePackage, PipelineError> {
    let ControllerOutcome { status, best, log } = outcome;
    let open_violations = groundedness_gate(&best.draft, &reframing_log, kb, jd)?;

    let mut warnings = log.warnings.clone();
    warnings.extend(p0_warning(jd));
    if mapping_coverage.gap_count > 0 {
        warnings.push(format!(
            "requirement_gaps: {} requirements have no supporting fact",
            mapping_coverage.gap_count
        ));
    }

    let interview_prep = interview_prep(&best.draft, &reframing_log);
    info!(
        "Packaged run {run_id}: status {status:?}, score {:.1}, {} warnings, {} interview notes",
        best.score.total,
        warnings.len(),
        interview_prep.len()
    );

    Ok(ResumePackage {
        run_id,
        status,
        mode,
        generated_at: Utc::now(),
        warnings,
        resume: best.draft,
        score_report: best.score,
        keyword_coverage: best.keywords,
        format_report: best.format,
        open_violations,
        reframing_log,
        interview_prep,
        mapping_coverage,
        iteration_log: log,
    })
}
