//! Scorer: five components and a weighted total.
//!
//! Three components are deterministic functions of the draft and the two audits; semantic
//! alignment and human readability come from a single model judge call.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm_client::extractor::{extract, ExtractError, SchemaCheck};
use crate::llm_client::{LlmErrorKind, ModelCapability, ModelRequest};
use crate::models::jd::{JdRecord, Priority};
use crate::models::resume::ResumeDraft;
use crate::models::score::{ScoreComponent, ScoreReport, ScoreWeights};
use crate::pipeline::format_checker::FormatReport;
use crate::pipeline::keyword_optimizer::KeywordReport;
use crate::pipeline::prompts::{JUDGE_PROMPT, JUDGE_SCHEMA, JUDGE_SYSTEM};
use crate::pipeline::rules::has_metric;
use crate::pipeline::{PipelineError, Stage};

/// Deducted from `keyword_match` per P0 keyword with zero occurrences.
pub const MISSING_P0_PENALTY: f64 = 10.0;

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// `found / total × 100 − 10 × missing`, floored at 0. A JD with no P0 keywords has
/// nothing to miss and scores 100.
pub fn keyword_match(report: &KeywordReport) -> f64 {
    let p0: Vec<_> = report.usages.iter().filter(|u| u.tier == Priority::P0).collect();
    if p0.is_empty() {
        return 100.0;
    }
    let found = p0.iter().filter(|u| u.counts.total() > 0).count();
    let missing = p0.len() - found;
    let raw = found as f64 / p0.len() as f64 * 100.0 - MISSING_P0_PENALTY * missing as f64;
    clamp_score(raw)
}

pub fn format_compliance(report: &FormatReport) -> f64 {
    clamp_score(report.compliance_pct())
}

/// Share of bullets carrying a quantified metric. No bullets scores 0.
pub fn achievement_density(draft: &ResumeDraft) -> f64 {
    let total = draft.total_bullets();
    if total == 0 {
        return 0.0;
    }
    let with_metric = draft.bullets().filter(|(_, _, b)| has_metric(&b.text)).count();
    with_metric as f64 / total as f64 * 100.0
}

/// Weighted sum of the (clamped) components, clamped to [0, 100].
pub fn weighted_total(components: &BTreeMap<ScoreComponent, f64>, weights: &ScoreWeights) -> f64 {
    let sum: f64 = ScoreComponent::ALL
        .iter()
        .map(|c| clamp_score(components.get(c).copied().unwrap_or(0.0)) * weights.weight(*c))
        .sum();
    clamp_score(sum)
}

// ────────────────────────────────────────────────────────────────────────────
// Model judge
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct QualityJudgement {
    pub semantic_alignment: f64,
    pub human_readability: f64,
    #[serde(default)]
    pub notes: String,
}

impl SchemaCheck for QualityJudgement {
    fn schema_issues(&self) -> Vec<String> {
        [
            ("semantic_alignment", self.semantic_alignment),
            ("human_readability", self.human_readability),
        ]
        .into_iter()
        .filter(|(_, v)| !(0.0..=100.0).contains(v))
        .map(|(name, v)| format!("{name} must be between 0 and 100, got {v}"))
        .collect()
    }
}

/// Plain-text rendering of a draft, as an ATS or a reviewer reads it.
pub fn resume_text(draft: &ResumeDraft) -> String {
    let mut out = format!("SUMMARY\n{}\n\nEXPERIENCE\n", draft.summary);
    for section in &draft.sections {
        out.push_str(&format!(
            "{} | {} | {}\n",
            section.title,
            section.company,
            section.dates.display()
        ));
        for bullet in &section.bullets {
            out.push_str(&format!("- {}\n", bullet.text));
        }
    }
    let skills: Vec<&str> = draft.skills.iter().map(String::as_str).collect();
    out.push_str(&format!("\nSKILLS\n{}\n", skills.join(", ")));
    out
}

/// `None` when the judge timed out; the caller scores both judged components as 0.
pub async fn judge(
    model: &dyn ModelCapability,
    draft: &ResumeDraft,
    jd: &JdRecord,
) -> Result<Option<QualityJudgement>, PipelineError> {
    let responsibilities = jd
        .key_responsibilities
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>();
    let responsibilities = if responsibilities.is_empty() {
        "not listed".to_string()
    } else {
        responsibilities.join("; ")
    };
    let prompt = JUDGE_PROMPT
        .replace("{job_title}", &jd.job_title)
        .replace("{company}", &jd.company)
        .replace("{responsibilities}", &responsibilities)
        .replace("{resume}", &resume_text(draft));
    let request = ModelRequest::new(JUDGE_SYSTEM, prompt, JUDGE_SCHEMA);

    match extract::<QualityJudgement>(model, &request).await {
        Ok(judgement) => Ok(Some(judgement)),
        Err(ExtractError::Model(e)) if e.kind() == LlmErrorKind::Timeout => {
            warn!("Quality judge timed out; scoring judged components as 0");
            Ok(None)
        }
        Err(e) => Err(PipelineError::from_extract(Stage::Scoring, e)),
    }
}

/// Scores a draft. The audits are passed in so the caller can reuse them as feedback.
pub async fn score(
    model: &dyn ModelCapability,
    draft: &ResumeDraft,
    jd: &JdRecord,
    keywords: &KeywordReport,
    format: &FormatReport,
    weights: &ScoreWeights,
) -> Result<ScoreReport, PipelineError> {
    let judgement = judge(model, draft, jd).await?;

    let mut component_scores = BTreeMap::new();
    component_scores.insert(ScoreComponent::KeywordMatch, keyword_match(keywords));
    component_scores.insert(ScoreComponent::FormatCompliance, format_compliance(format));
    component_scores.insert(ScoreComponent::AchievementDensity, achievement_density(draft));
    let (semantic, readability) = judgement
        .as_ref()
        .map(|j| (j.semantic_alignment, j.human_readability))
        .unwrap_or((0.0, 0.0));
    component_scores.insert(ScoreComponent::SemanticAlignment, clamp_score(semantic));
    component_scores.insert(ScoreComponent::HumanReadability, clamp_score(readability));

    let total = weighted_total(&component_scores, weights);
    debug!("Scored draft: total {total:.1} {component_scores:?}");
    Ok(ScoreReport {
        component_scores,
        total,
        weights: *weights,
        judge_timed_out: judgement.is_none(),
    })
}
