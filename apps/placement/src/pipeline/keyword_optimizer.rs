//! Keyword Optimizer: deterministic keyword audit of a draft against the JD tiers.
//!
//! The audit never edits content. Its report drives the model-applied keyword patch,
//! whose output is finalized exactly like a fresh reframe.

use serde::Serialize;
use tracing::debug;

use crate::knowledge::KnowledgeBase;
use crate::llm_client::extractor::extract_with;
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::ModelRequest;
use crate::models::jd::{JdRecord, Priority};
use crate::models::profile::FactKind;
use crate::models::resume::ResumeDraft;
use crate::pipeline::prompts::{render_facts, KEYWORD_PATCH_PROMPT, KEYWORD_PATCH_SCHEMA, REFRAME_SYSTEM};
use crate::pipeline::reframer::{finalize, GeneratedResume, ReframeOutput};
use crate::pipeline::rules::{contains_term, count_term};
use crate::pipeline::{PipelineError, RunContext, Stage};

/// Target occurrence bands, inclusive.
pub const P0_BAND: (usize, usize) = (2, 3);
pub const P1_BAND: (usize, usize) = (1, 2);
/// No keyword may appear more often than this, whatever its tier.
pub const KEYWORD_CEILING: usize = 4;

fn band(tier: Priority) -> (usize, usize) {
    match tier {
        Priority::P0 => P0_BAND,
        Priority::P1 => P1_BAND,
        Priority::P2 => (0, KEYWORD_CEILING),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionCounts {
    pub summary: usize,
    pub experience: usize,
    pub skills: usize,
}

impl SectionCounts {
    pub fn total(&self) -> usize {
        self.summary + self.experience + self.skills
    }

    fn sections_used(&self) -> usize {
        [self.summary, self.experience, self.skills]
            .iter()
            .filter(|c| **c > 0)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordUsage {
    pub keyword: String,
    pub tier: Priority,
    pub counts: SectionCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsertionTarget {
    Bullet {
        section: usize,
        bullet: usize,
        fact_id: String,
    },
    Skills,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertionSuggestion {
    pub keyword: String,
    pub tier: Priority,
    pub target: InsertionTarget,
}

/// A declared full/short pair where only one form made it into the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbbreviationGap {
    pub full: String,
    pub short: String,
    pub missing_form: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordReport {
    pub usages: Vec<KeywordUsage>,
    /// P0/P1 keywords that never appear.
    pub missing: Vec<String>,
    /// Present, but below the tier's band.
    pub under_target: Vec<String>,
    /// Above the tier's band or the hard ceiling.
    pub over_used: Vec<String>,
    /// Two or more occurrences, all inside a single section.
    pub poorly_distributed: Vec<String>,
    pub abbreviation_gaps: Vec<AbbreviationGap>,
    pub insertion_suggestions: Vec<InsertionSuggestion>,
    pub p0_coverage_pct: f64,
    pub p1_coverage_pct: f64,
}

impl KeywordReport {
    pub fn usage(&self, keyword: &str) -> Option<&KeywordUsage> {
        self.usages
            .iter()
            .find(|u| u.keyword.eq_ignore_ascii_case(keyword))
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.under_target.is_empty()
            && self.over_used.is_empty()
            && self.poorly_distributed.is_empty()
            && self.abbreviation_gaps.is_empty()
    }

    /// Flat description of every finding, used as retry feedback.
    pub fn gaps(&self) -> Vec<String> {
        let mut out: Vec<String> = self.missing.iter().map(|k| format!("missing: {k}")).collect();
        out.extend(self.under_target.iter().map(|k| format!("under target: {k}")));
        out.extend(self.over_used.iter().map(|k| format!("over-used: {k}")));
        out.extend(self.poorly_distributed.iter().map(|k| format!("single section: {k}")));
        out.extend(
            self.abbreviation_gaps
                .iter()
                .map(|g| format!("needs both forms: {} / {}", g.full, g.short)),
        );
        out
    }
}

/// The keyword plus any declared abbreviation partner.
fn forms(keyword: &str, jd: &JdRecord) -> Vec<String> {
    let mut out = vec![keyword.to_string()];
    for pair in &jd.abbreviations {
        if pair.full.eq_ignore_ascii_case(keyword) {
            out.push(pair.short.clone());
        } else if pair.short.eq_ignore_ascii_case(keyword) {
            out.push(pair.full.clone());
        }
    }
    out
}

fn count_forms(text: &str, forms: &[String]) -> usize {
    forms.iter().map(|f| count_term(text, f)).sum()
}

fn section_counts(draft: &ResumeDraft, forms: &[String]) -> SectionCounts {
    SectionCounts {
        summary: count_forms(&draft.summary, forms),
        experience: draft
            .bullets()
            .map(|(_, _, b)| count_forms(&b.text, forms))
            .sum(),
        skills: draft.skills.iter().map(|s| count_forms(s, forms)).sum(),
    }
}

fn coverage(usages: &[KeywordUsage], tier: Priority) -> f64 {
    let in_tier: Vec<_> = usages.iter().filter(|u| u.tier == tier).collect();
    if in_tier.is_empty() {
        return 100.0;
    }
    let found = in_tier.iter().filter(|u| u.counts.total() > 0).count();
    found as f64 / in_tier.len() as f64 * 100.0
}

fn suggest(keyword: &str, forms: &[String], draft: &ResumeDraft, kb: &dyn KnowledgeBase) -> Option<InsertionTarget> {
    let grounded = forms.iter().any(|f| kb.grounds_term(f));
    if !grounded {
        return None;
    }
    for (at, _, bullet) in draft.bullets() {
        if contains_term(&bullet.text, keyword) {
            continue;
        }
        let backing = bullet
            .source_fact_ids
            .iter()
            .filter_map(|id| kb.fact(id))
            .find(|f| forms.iter().any(|form| contains_term(&f.text, form)));
        if let Some(fact) = backing {
            return Some(InsertionTarget::Bullet {
                section: at.section,
                bullet: at.bullet,
                fact_id: fact.id.clone(),
            });
        }
    }
    let skill_like = forms.iter().any(|f| {
        kb.facts_mentioning(f)
            .iter()
            .any(|fact| matches!(fact.kind, FactKind::Skill | FactKind::Tool))
    });
    if skill_like {
        Some(InsertionTarget::Skills)
    } else {
        Some(InsertionTarget::Summary)
    }
}

/// Counts every P0/P1/P2 keyword per section and checks bands, distribution and
/// abbreviation pairs. Pure.
pub fn audit_keywords(draft: &ResumeDraft, jd: &JdRecord, kb: &dyn KnowledgeBase) -> KeywordReport {
    let mut report = KeywordReport {
        usages: Vec::new(),
        missing: Vec::new(),
        under_target: Vec::new(),
        over_used: Vec::new(),
        poorly_distributed: Vec::new(),
        abbreviation_gaps: Vec::new(),
        insertion_suggestions: Vec::new(),
        p0_coverage_pct: 100.0,
        p1_coverage_pct: 100.0,
    };

    for tier in Priority::ALL {
        for keyword in jd.keywords(tier) {
            let forms = forms(keyword, jd);
            let counts = section_counts(draft, &forms);
            let total = counts.total();
            let (min, max) = band(tier);

            if tier != Priority::P2 {
                if total == 0 {
                    report.missing.push(keyword.clone());
                } else if total < min {
                    report.under_target.push(keyword.clone());
                }
                if total < min {
                    if let Some(target) = suggest(keyword, &forms, draft, kb) {
                        report.insertion_suggestions.push(InsertionSuggestion {
                            keyword: keyword.clone(),
                            tier,
                            target,
                        });
                    }
                }
            }
            if total > max.min(KEYWORD_CEILING) {
                report.over_used.push(keyword.clone());
            }
            if total >= 2 && counts.sections_used() == 1 {
                report.poorly_distributed.push(keyword.clone());
            }

            report.usages.push(KeywordUsage {
                keyword: keyword.clone(),
                tier,
                counts,
            });
        }
    }

    for pair in &jd.abbreviations {
        let text_has = |form: &str| {
            contains_term(&draft.summary, form)
                || draft.bullets().any(|(_, _, b)| contains_term(&b.text, form))
                || draft.skills.iter().any(|s| contains_term(s, form))
        };
        let (full, short) = (text_has(&pair.full), text_has(&pair.short));
        if full != short {
            report.abbreviation_gaps.push(AbbreviationGap {
                full: pair.full.clone(),
                short: pair.short.clone(),
                missing_form: if full { pair.short.clone() } else { pair.full.clone() },
            });
        }
    }

    report.p0_coverage_pct = coverage(&report.usages, Priority::P0);
    report.p1_coverage_pct = coverage(&report.usages, Priority::P1);
    debug!(
        "Keyword audit: P0 {:.1}% / P1 {:.1}%, {} missing, {} over-used",
        report.p0_coverage_pct,
        report.p1_coverage_pct,
        report.missing.len(),
        report.over_used.len()
    );
    report
}

fn render_suggestions(report: &KeywordReport, draft: &ResumeDraft) -> String {
    if report.insertion_suggestions.is_empty() {
        return "none".to_string();
    }
    report
        .insertion_suggestions
        .iter()
        .map(|s| match &s.target {
            InsertionTarget::Bullet {
                section,
                bullet,
                fact_id,
            } => {
                let text = draft
                    .sections
                    .get(*section)
                    .and_then(|sec| sec.bullets.get(*bullet))
                    .map(|b| b.text.as_str())
                    .unwrap_or_default();
                format!("{} -> bullet \"{text}\" (backed by {fact_id})", s.keyword)
            }
            InsertionTarget::Skills => format!("{} -> skills", s.keyword),
            InsertionTarget::Summary => format!("{} -> summary", s.keyword),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// One-shot keyword patch: the model applies the report's edits, then the result is
/// linted and repaired like any reframe.
pub async fn apply_keyword_patch(
    ctx: RunContext<'_>,
    draft: &ResumeDraft,
    report: &KeywordReport,
) -> Result<ReframeOutput, PipelineError> {
    let abbreviations = report
        .abbreviation_gaps
        .iter()
        .map(|g| format!("{} / {} (add {})", g.full, g.short, g.missing_form))
        .collect::<Vec<_>>();
    let mut missing = report.missing.clone();
    missing.extend(report.under_target.iter().cloned());
    let rendered_draft = serde_json::to_string_pretty(draft).unwrap_or_default();

    let prompt = KEYWORD_PATCH_PROMPT
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{missing}", &list_or_none(&missing))
        .replace("{over_used}", &list_or_none(&report.over_used))
        .replace("{suggestions}", &render_suggestions(report, draft))
        .replace("{abbreviations}", &list_or_none(&abbreviations))
        .replace("{draft}", &rendered_draft)
        .replace("{facts}", &render_facts(ctx.kb.facts()));
    let request = ModelRequest::new(REFRAME_SYSTEM, prompt, KEYWORD_PATCH_SCHEMA);

    let generated: GeneratedResume = extract_with(ctx.model, &request, |g: &GeneratedResume| g.issues(ctx.kb))
        .await
        .map_err(|e| PipelineError::from_extract(Stage::KeywordPatch, e))?;
    finalize(ctx, generated, Stage::KeywordPatch).await
}
