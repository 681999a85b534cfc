//! Iteration Controller: the scoring state machine that decides between finishing, one
//! targeted patch, a full retry with feedback, or giving up with the best draft so far.
//!
//! `decide` is the whole transition function and is pure. `run_controller` drives it
//! against a `StageRunner`, so the loop can be tested with synthetic scores.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::models::resume::{ReframingLogEntry, ResumeDraft};
use crate::models::score::{ScoreComponent, ScoreReport, ScoreWeights};
use crate::pipeline::cancel::RunCancellation;
use crate::pipeline::format_checker::FormatReport;
use crate::pipeline::keyword_optimizer::KeywordReport;
use crate::pipeline::reframer::ReframeFeedback;
use crate::pipeline::rules::RuleViolation;
use crate::pipeline::{PipelineError, Stage};

pub const WARN_BUDGET_EXHAUSTED: &str = "budget_exhausted";
pub const WARN_LATENCY_EXCEEDED: &str = "latency_budget_exceeded";
pub const WARN_BELOW_THRESHOLD: &str = "score_below_threshold";
pub const WARN_JUDGE_TIMEOUT: &str = "judge_timeout";
pub const WARN_PATCH_WITHOUT_DRAFT: &str = "patch_without_draft";
pub const WARN_NO_ADMISSIBLE_DRAFT: &str = "no_admissible_draft";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Patch and full retries.
    #[default]
    Full,
    /// At most one patch, never a full retry.
    Fast,
    /// Score once.
    Fastest,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(PipelineMode::Full),
            "fast" => Ok(PipelineMode::Fast),
            "fastest" => Ok(PipelineMode::Fastest),
            other => Err(format!("unknown pipeline mode '{other}' (expected full, fast or fastest)")),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineMode::Full => "full",
            PipelineMode::Fast => "fast",
            PipelineMode::Fastest => "fastest",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub done_threshold: f64,
    pub patch_threshold: f64,
    pub max_full_retries: usize,
    /// Soft deadline for the whole loop, checked between stages.
    pub latency_budget: Duration,
    pub weights: ScoreWeights,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            done_threshold: 90.0,
            patch_threshold: 80.0,
            max_full_retries: 3,
            latency_budget: Duration::from_secs(150),
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Scoring,
    Done,
    OneShotPatch,
    FullRetry,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Done,
    OneShotPatch,
    FullRetry,
    Exhausted,
}

impl From<Decision> for ControllerState {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Done => ControllerState::Done,
            Decision::OneShotPatch => ControllerState::OneShotPatch,
            Decision::FullRetry => ControllerState::FullRetry,
            Decision::Exhausted => ControllerState::Exhausted,
        }
    }
}

/// Transition after a scoring step. `patched` is true once the single patch has run,
/// after which the run always finishes.
pub fn decide(total: f64, retries_used: usize, patched: bool, mode: PipelineMode, cfg: &ControllerConfig) -> Decision {
    if total >= cfg.done_threshold || patched {
        return Decision::Done;
    }
    match mode {
        PipelineMode::Fastest => Decision::Done,
        PipelineMode::Fast => Decision::OneShotPatch,
        PipelineMode::Full if total >= cfg.patch_threshold => Decision::OneShotPatch,
        PipelineMode::Full if retries_used < cfg.max_full_retries => Decision::FullRetry,
        PipelineMode::Full => Decision::Exhausted,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Attempts and history
// ────────────────────────────────────────────────────────────────────────────

/// One scored draft.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub draft: ResumeDraft,
    /// Log entries produced while making this draft.
    pub log: Vec<ReframingLogEntry>,
    pub violations: Vec<RuleViolation>,
    pub keywords: KeywordReport,
    pub format: FormatReport,
    pub score: ScoreReport,
}

impl Attempt {
    /// Retry input built from this attempt's shortfalls.
    pub fn feedback(&self) -> ReframeFeedback {
        ReframeFeedback {
            previous_total: self.score.total,
            component_scores: self.score.component_scores.clone(),
            focus: Some(self.score.weakest_component()),
            violations: self
                .violations
                .iter()
                .chain(&self.format.violations)
                .map(|v| format!("{}: {}", v.rule, v.message))
                .collect(),
            keyword_gaps: self.keywords.gaps(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftSnapshot {
    pub iteration: usize,
    pub stage: Stage,
    pub draft: ResumeDraft,
    pub score: ScoreReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationLog {
    pub states: Vec<ControllerState>,
    pub patch_count: usize,
    pub retries: usize,
    pub timeouts_absorbed: usize,
    /// Scored attempts that could not pass the groundedness gate.
    pub rejected_by_gate: usize,
    pub feedback_applied: Vec<String>,
    pub warnings: Vec<String>,
    pub history: Vec<DraftSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ControllerOutcome {
    pub status: RunStatus,
    pub best: Attempt,
    pub log: IterationLog,
}

/// The stages the controller loops over.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Reframe → keyword audit → format check → score.
    async fn draft(&self, feedback: Option<&ReframeFeedback>) -> Result<Attempt, PipelineError>;

    /// Re-invokes only the stage responsible for `focus`, then re-scores.
    async fn patch(&self, previous: &Attempt, focus: ScoreComponent) -> Result<Attempt, PipelineError>;

    /// Whether the attempt could be emitted as is. Inadmissible attempts stay in the
    /// history but count as a failed iteration and never become the best draft.
    fn admissible(&self, _attempt: &Attempt) -> bool {
        true
    }
}

enum Step {
    Draft,
    Patch,
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

pub async fn run_controller(
    runner: &dyn StageRunner,
    mode: PipelineMode,
    cfg: &ControllerConfig,
    cancel: &RunCancellation,
    deadline: Instant,
) -> Result<ControllerOutcome, PipelineError> {
    let mut log = IterationLog::default();
    let mut best: Option<Attempt> = None;
    let mut best_rejected: Option<Attempt> = None;
    let mut latest: Option<Attempt> = None;
    let mut feedback: Option<ReframeFeedback> = None;
    let mut retries_used = 0;
    let mut patched = false;
    let mut step = Step::Draft;
    let mut iteration = 0;

    let status = loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if best.is_some() && Instant::now() >= deadline {
            warn!("Latency budget of {:?} exceeded; emitting best draft so far", cfg.latency_budget);
            log.warnings.push(WARN_LATENCY_EXCEEDED.to_string());
            break RunStatus::Done;
        }

        iteration += 1;
        let (stage, result) = match (&step, latest.as_ref()) {
            (Step::Patch, Some(previous)) => {
                let focus = previous.score.weakest_component();
                info!("Iteration {iteration}: one-shot patch on {focus}");
                log.feedback_applied.push(format!("patch: {focus}"));
                (Stage::KeywordPatch, runner.patch(previous, focus).await)
            }
            _ => {
                info!("Iteration {iteration}: full draft (retry {retries_used})");
                (Stage::Reframe, runner.draft(feedback.as_ref()).await)
            }
        };

        log.states.push(ControllerState::Scoring);
        let total = match result {
            Ok(attempt) => {
                let total = attempt.score.total;
                if attempt.score.judge_timed_out {
                    log.timeouts_absorbed += 1;
                }
                log.history.push(DraftSnapshot {
                    iteration,
                    stage,
                    draft: attempt.draft.clone(),
                    score: attempt.score.clone(),
                });
                let total = if runner.admissible(&attempt) {
                    if best.as_ref().map_or(true, |b| total > b.score.total) {
                        best = Some(attempt.clone());
                    }
                    total
                } else {
                    warn!("Iteration {iteration} scored {total:.1} but fails the groundedness gate");
                    log.rejected_by_gate += 1;
                    if best_rejected.as_ref().map_or(true, |b| total > b.score.total) {
                        best_rejected = Some(attempt.clone());
                    }
                    0.0
                };
                latest = Some(attempt);
                total
            }
            Err(e) if e.is_recoverable() => {
                warn!("Iteration {iteration} absorbed: {e}");
                log.timeouts_absorbed += 1;
                0.0
            }
            Err(e) => return Err(e),
        };

        let decision = decide(total, retries_used, patched, mode, cfg);
        info!("Iteration {iteration} scored {total:.1} → {decision:?}");
        log.states.push(decision.into());
        match decision {
            Decision::Done => break RunStatus::Done,
            Decision::Exhausted => break RunStatus::Exhausted,
            Decision::OneShotPatch if latest.is_none() => {
                // Nothing scored yet: the one remaining attempt becomes a fresh draft.
                warn!("Iteration {iteration}: no draft to patch; spending the patch on a fresh draft");
                log.warnings.push(WARN_PATCH_WITHOUT_DRAFT.to_string());
                patched = true;
                step = Step::Draft;
            }
            Decision::OneShotPatch => {
                patched = true;
                log.patch_count += 1;
                step = Step::Patch;
            }
            Decision::FullRetry => {
                retries_used += 1;
                log.retries = retries_used;
                feedback = latest.as_ref().map(Attempt::feedback);
                if let Some(fb) = &feedback {
                    log.feedback_applied.push(format!(
                        "retry {retries_used}: previous {:.1}, {} violations, {} keyword gaps",
                        fb.previous_total,
                        fb.violations.len(),
                        fb.keyword_gaps.len()
                    ));
                }
                step = Step::Draft;
            }
        }
    };

    // A rejected draft is only handed on when nothing passed; the package gate then
    // reports why it cannot be emitted.
    let best = match (best, best_rejected) {
        (Some(best), _) => best,
        (None, Some(rejected)) => {
            log.warnings.push(WARN_NO_ADMISSIBLE_DRAFT.to_string());
            rejected
        }
        (None, None) => return Err(PipelineError::Timeout { stage: Stage::Reframe }),
    };

    match status {
        RunStatus::Exhausted => {
            warn!(
                "Retry budget exhausted after {retries_used} full retries; best score {:.1}",
                best.score.total
            );
            log.warnings.push(format!(
                "{WARN_BUDGET_EXHAUSTED}: best score {:.1} after {retries_used} full retries",
                best.score.total
            ));
        }
        RunStatus::Done if best.score.total < cfg.patch_threshold => {
            log.warnings.push(format!(
                "{WARN_BELOW_THRESHOLD}: final score {:.1}",
                best.score.total
            ));
        }
        RunStatus::Done => {}
    }
    if best.score.judge_timed_out {
        log.warnings.push(WARN_JUDGE_TIMEOUT.to_string());
    }

    Ok(ControllerOutcome { status, best, log })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use super::*;
    use crate::knowledge::fixtures::knowledge_base;
    use crate::models::jd::fixtures::jd_record;
    use crate::models::resume::fixtures::{bullet, draft, section};
    use crate::pipeline::cancel::cancellation;
    use crate::pipeline::format_checker::check_format;
    use crate::pipeline::keyword_optimizer::audit_keywords;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Out {
        Score(f64),
        Timeout,
        Fail,
    }

    /// Components all 100 except `weak`; `total` is taken as given.
    fn attempt(label: &str, total: f64, weak: ScoreComponent) -> Attempt {
        let d = draft(
            label,
            vec![section("r1", (2022, 3), None, vec![bullet("Cut churn 9% across 12 accounts", &["f3"])])],
            &[],
        );
        let kb = knowledge_base();
        let component_scores = ScoreComponent::ALL
            .into_iter()
            .map(|c| (c, if c == weak { 0.0 } else { 100.0 }))
            .collect::<BTreeMap<_, _>>();
        Attempt {
            keywords: audit_keywords(&d, &jd_record(&[], &[], &[]), &kb),
            format: check_format(&d),
            draft: d,
            log: vec![],
            violations: vec![],
            score: ScoreReport {
                component_scores,
                total,
                weights: ScoreWeights::default(),
                judge_timed_out: false,
            },
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        drafts: Mutex<VecDeque<Out>>,
        patches: Mutex<VecDeque<Out>>,
        draft_calls: Mutex<Vec<Option<f64>>>,
        patch_calls: Mutex<Vec<ScoreComponent>>,
        weak: Option<ScoreComponent>,
        /// Draft labels the gate turns away.
        rejected: Vec<&'static str>,
    }

    impl FakeRunner {
        fn new(drafts: &[Out], patches: &[Out]) -> Self {
            Self {
                drafts: Mutex::new(drafts.iter().copied().collect()),
                patches: Mutex::new(patches.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn produce(&self, out: Option<Out>, label: String) -> Result<Attempt, PipelineError> {
            let weak = self.weak.unwrap_or(ScoreComponent::KeywordMatch);
            match out {
                Some(Out::Score(total)) => Ok(attempt(&label, total, weak)),
                Some(Out::Timeout) => Err(PipelineError::Timeout { stage: Stage::Reframe }),
                Some(Out::Fail) | None => Err(PipelineError::Mapping("scripted failure".to_string())),
            }
        }

        fn draft_count(&self) -> usize {
            self.draft_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl StageRunner for FakeRunner {
        async fn draft(&self, feedback: Option<&ReframeFeedback>) -> Result<Attempt, PipelineError> {
            let n = {
                let mut calls = self.draft_calls.lock().unwrap();
                calls.push(feedback.map(|f| f.previous_total));
                calls.len()
            };
            let out = self.drafts.lock().unwrap().pop_front();
            self.produce(out, format!("draft {n}"))
        }

        async fn patch(&self, previous: &Attempt, focus: ScoreComponent) -> Result<Attempt, PipelineError> {
            self.patch_calls.lock().unwrap().push(focus);
            let out = self.patches.lock().unwrap().pop_front();
            self.produce(out, format!("patch of {}", previous.draft.summary))
        }

        fn admissible(&self, attempt: &Attempt) -> bool {
            !self.rejected.contains(&attempt.draft.summary.as_str())
        }
    }

    async fn run(runner: &FakeRunner, mode: PipelineMode) -> Result<ControllerOutcome, PipelineError> {
        let cfg = ControllerConfig::default();
        let deadline = Instant::now() + cfg.latency_budget;
        run_controller(runner, mode, &cfg, &RunCancellation::never(), deadline).await
    }

    #[test]
    fn test_decide_transitions() {
        let cfg = ControllerConfig::default();
        let full = PipelineMode::Full;
        assert_eq!(decide(90.0, 0, false, full, &cfg), Decision::Done);
        assert_eq!(decide(89.9, 0, false, full, &cfg), Decision::OneShotPatch);
        assert_eq!(decide(80.0, 3, false, full, &cfg), Decision::OneShotPatch);
        assert_eq!(decide(79.9, 0, false, full, &cfg), Decision::FullRetry);
        assert_eq!(decide(79.9, 2, false, full, &cfg), Decision::FullRetry);
        assert_eq!(decide(79.9, 3, false, full, &cfg), Decision::Exhausted);
        assert_eq!(decide(10.0, 0, true, full, &cfg), Decision::Done);
        assert_eq!(decide(50.0, 0, false, PipelineMode::Fast, &cfg), Decision::OneShotPatch);
        assert_eq!(decide(50.0, 0, true, PipelineMode::Fast, &cfg), Decision::Done);
        assert_eq!(decide(50.0, 0, false, PipelineMode::Fastest, &cfg), Decision::Done);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("FAST".parse::<PipelineMode>().unwrap(), PipelineMode::Fast);
        assert!("turbo".parse::<PipelineMode>().is_err());
        assert_eq!(serde_json::to_string(&PipelineMode::Fastest).unwrap(), "\"fastest\"");
    }

    #[tokio::test]
    async fn test_high_first_score_finishes_immediately() {
        let runner = FakeRunner::new(&[Out::Score(95.0)], &[]);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.log.states, vec![ControllerState::Scoring, ControllerState::Done]);
        assert_eq!(outcome.log.patch_count, 0);
        assert!(outcome.log.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_mid_score_gets_exactly_one_patch_on_weakest() {
        let mut runner = FakeRunner::new(&[Out::Score(84.0)], &[Out::Score(86.0), Out::Score(99.0)]);
        runner.weak = Some(ScoreComponent::AchievementDensity);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.log.patch_count, 1);
        assert_eq!(*runner.patch_calls.lock().unwrap(), vec![ScoreComponent::AchievementDensity]);
        assert_eq!(runner.draft_count(), 1);
        assert_eq!(outcome.best.score.total, 86.0);
        assert_eq!(outcome.best.draft.summary, "patch of draft 1");
        assert_eq!(
            outcome.log.states,
            vec![
                ControllerState::Scoring,
                ControllerState::OneShotPatch,
                ControllerState::Scoring,
                ControllerState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_regressing_patch_keeps_earlier_draft() {
        let runner = FakeRunner::new(&[Out::Score(84.0)], &[Out::Score(70.0)]);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.best.score.total, 84.0);
        assert_eq!(outcome.best.draft.summary, "draft 1");
        assert_eq!(outcome.log.history.len(), 2);
    }

    #[tokio::test]
    async fn test_low_scores_exhaust_with_warning() {
        let runner = FakeRunner::new(&[Out::Score(65.0); 4], &[]);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(runner.draft_count(), 4);
        assert_eq!(outcome.log.retries, 3);
        assert!(outcome.log.warnings[0].starts_with(WARN_BUDGET_EXHAUSTED));
        // Equal scores never replace the first draft.
        assert_eq!(outcome.best.draft.summary, "draft 1");
    }

    #[tokio::test]
    async fn test_exhausted_run_returns_best_not_last() {
        let runner = FakeRunner::new(
            &[Out::Score(60.0), Out::Score(75.0), Out::Score(70.0), Out::Score(50.0)],
            &[],
        );
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(outcome.best.score.total, 75.0);
        assert_eq!(outcome.best.draft.summary, "draft 2");
    }

    #[tokio::test]
    async fn test_retry_receives_previous_score_as_feedback() {
        let runner = FakeRunner::new(&[Out::Score(60.0), Out::Score(92.0)], &[]);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(*runner.draft_calls.lock().unwrap(), vec![None, Some(60.0)]);
        assert_eq!(outcome.log.retries, 1);
        assert_eq!(outcome.log.feedback_applied.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_absorbed_as_low_score() {
        let runner = FakeRunner::new(&[Out::Timeout, Out::Score(91.0)], &[]);
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.log.timeouts_absorbed, 1);
        assert_eq!(outcome.log.retries, 1);
        assert_eq!(outcome.best.score.total, 91.0);
    }

    #[tokio::test]
    async fn test_every_attempt_timing_out_surfaces_timeout() {
        let runner = FakeRunner::new(&[Out::Timeout; 4], &[]);
        let err = run(&runner, PipelineMode::Full).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_structural_error_aborts() {
        let runner = FakeRunner::new(&[Out::Fail], &[]);
        let err = run(&runner, PipelineMode::Full).await.unwrap_err();
        assert!(matches!(err, PipelineError::Mapping(_)));
    }

    #[tokio::test]
    async fn test_fast_mode_patches_once_without_retry() {
        let runner = FakeRunner::new(&[Out::Score(70.0)], &[Out::Score(75.0)]);
        let outcome = run(&runner, PipelineMode::Fast).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(runner.draft_count(), 1);
        assert_eq!(outcome.log.patch_count, 1);
        assert!(outcome.log.warnings[0].starts_with(WARN_BELOW_THRESHOLD));
    }

    #[tokio::test]
    async fn test_fast_mode_first_draft_timeout_spends_patch_on_fresh_draft() {
        let runner = FakeRunner::new(&[Out::Timeout, Out::Score(75.0)], &[Out::Score(99.0)]);
        let outcome = run(&runner, PipelineMode::Fast).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(*runner.draft_calls.lock().unwrap(), vec![None, None]);
        assert!(runner.patch_calls.lock().unwrap().is_empty());
        assert_eq!(outcome.log.patch_count, 0);
        assert_eq!(outcome.log.timeouts_absorbed, 1);
        assert_eq!(outcome.best.score.total, 75.0);
        assert!(outcome.log.warnings.contains(&WARN_PATCH_WITHOUT_DRAFT.to_string()));
        assert_eq!(
            outcome.log.states,
            vec![
                ControllerState::Scoring,
                ControllerState::OneShotPatch,
                ControllerState::Scoring,
                ControllerState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_gate_rejected_draft_never_becomes_best() {
        let mut runner = FakeRunner::new(&[Out::Score(95.0), Out::Score(85.0)], &[Out::Score(88.0)]);
        runner.rejected = vec!["draft 1"];
        let outcome = run(&runner, PipelineMode::Full).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.log.rejected_by_gate, 1);
        // The rejected draft counted as a failed iteration, not as a finished one.
        assert_eq!(outcome.log.retries, 1);
        assert_eq!(outcome.best.draft.summary, "patch of draft 2");
        assert_eq!(outcome.best.score.total, 88.0);
        assert!(!outcome.log.warnings.contains(&WARN_NO_ADMISSIBLE_DRAFT.to_string()));
    }

    #[tokio::test]
    async fn test_only_rejected_drafts_are_handed_on_with_warning() {
        let mut runner = FakeRunner::new(&[Out::Score(95.0)], &[]);
        runner.rejected = vec!["draft 1"];
        let outcome = run(&runner, PipelineMode::Fastest).await.unwrap();

        assert_eq!(outcome.best.draft.summary, "draft 1");
        assert!(outcome.log.warnings.contains(&WARN_NO_ADMISSIBLE_DRAFT.to_string()));
    }

    #[tokio::test]
    async fn test_fastest_mode_scores_once() {
        let runner = FakeRunner::new(&[Out::Score(70.0)], &[Out::Score(99.0)]);
        let outcome = run(&runner, PipelineMode::Fastest).await.unwrap();
        assert_eq!(outcome.log.patch_count, 0);
        assert!(runner.patch_calls.lock().unwrap().is_empty());
        assert_eq!(outcome.best.score.total, 70.0);
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_calls() {
        let (handle, cancel) = cancellation();
        handle.cancel();
        let runner = FakeRunner::new(&[Out::Score(95.0)], &[]);
        let cfg = ControllerConfig::default();
        let err = run_controller(&runner, PipelineMode::Full, &cfg, &cancel, Instant::now() + cfg.latency_budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(runner.draft_count(), 0);
    }

    #[tokio::test]
    async fn test_latency_budget_stops_loop_with_best_so_far() {
        let runner = FakeRunner::new(&[Out::Score(65.0), Out::Score(95.0)], &[]);
        let cfg = ControllerConfig::default();
        let outcome = run_controller(&runner, PipelineMode::Full, &cfg, &RunCancellation::never(), Instant::now())
            .await
            .unwrap();
        assert_eq!(runner.draft_count(), 1);
        assert_eq!(outcome.best.score.total, 65.0);
        assert!(outcome.log.warnings.contains(&WARN_LATENCY_EXCEEDED.to_string()));
    }

    proptest! {
        #[test]
        fn prop_best_is_historical_maximum(
            drafts in proptest::collection::vec(0.0f64..100.0, 4),
            patch in 0.0f64..100.0,
        ) {
            let outs: Vec<Out> = drafts.iter().map(|s| Out::Score(*s)).collect();
            let runner = FakeRunner::new(&outs, &[Out::Score(patch)]);
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let outcome = rt.block_on(run(&runner, PipelineMode::Full)).unwrap();

            let max = outcome
                .log
                .history
                .iter()
                .map(|s| s.score.total)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(outcome.best.score.total, max);
            prop_assert!(outcome.log.retries <= ControllerConfig::default().max_full_retries);
            prop_assert!(outcome.log.patch_count <= 1);
        }
    }
}
