//! Content Reframer: mapping matrix + knowledge base → a tailored, grounded resume draft.
//!
//! The model writes the draft in one call; everything it returns is then linted against
//! the rule tables. Offending units (one bullet, or the summary) are regenerated alone,
//! and a unit that still fails falls back to literal fact text instead of failing the run.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::knowledge::KnowledgeBase;
use crate::llm_client::extractor::{extract_with, ExtractError};
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::ModelRequest;
use crate::models::mapping::MappingMatrix;
use crate::models::profile::{FactKind, ProfileFact};
use crate::models::resume::{Bullet, BulletRef, ReframingLogEntry, ResumeDraft, RoleSection, SkillsBlock};
use crate::models::score::ScoreComponent;
use crate::pipeline::format_checker::standard_presentation;
use crate::pipeline::preferences::EditPreferences;
use crate::pipeline::prompts::{
    render_facts, BULLET_REGEN_PROMPT, BULLET_SCHEMA, FEEDBACK_TEMPLATE, REFRAME_PROMPT, REFRAME_SYSTEM,
    RESUME_DRAFT_SCHEMA, SUMMARY_REGEN_PROMPT, SUMMARY_SCHEMA,
};
use crate::pipeline::rules::{
    contains_term, has_metric, lint_draft, role_bullet_cap, Location, RuleClass, RuleViolation, BANNED_OPENERS,
    PREFERRED_VERBS, ROLE_BULLET_CAPS,
};
use crate::pipeline::{PipelineError, RunContext, Stage};

/// Regeneration attempts per bullet or summary before falling back.
pub const MAX_UNIT_ATTEMPTS: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Model output
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedSection {
    pub role_id: String,
    #[serde(default)]
    pub bullets: Vec<Bullet>,
}

/// A full draft as the model returns it. Role metadata and presentation are filled in
/// from the knowledge base during assembly.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedResume {
    pub summary: String,
    #[serde(default)]
    pub summary_fact_ids: Vec<String>,
    #[serde(default)]
    pub sections: Vec<GeneratedSection>,
    #[serde(default)]
    pub skills: SkillsBlock,
    #[serde(default)]
    pub reframing_log: Vec<ReframingLogEntry>,
}

/// True when `text` is one of its cited facts, word for word.
pub(crate) fn is_verbatim(text: &str, fact_ids: &[String], kb: &dyn KnowledgeBase) -> bool {
    fact_ids
        .iter()
        .filter_map(|id| kb.fact(id))
        .any(|f| f.text.trim() == text.trim())
}

pub(crate) fn is_logged(text: &str, log: &[ReframingLogEntry]) -> bool {
    log.iter().any(|e| e.reframed.trim() == text.trim())
}

impl GeneratedResume {
    /// Structural problems worth a repair prompt. Grounding of individual units is left to
    /// the linter so one bad bullet never costs a full redraft.
    pub fn issues(&self, kb: &dyn KnowledgeBase) -> Vec<String> {
        let mut issues = Vec::new();
        if self.summary.trim().is_empty() {
            issues.push("summary is empty".to_string());
        }
        if self.sections.is_empty() {
            issues.push("no experience sections were written".to_string());
        }
        let mut seen_roles = HashSet::new();
        for section in &self.sections {
            if kb.role(&section.role_id).is_none() {
                issues.push(format!("unknown role_id '{}'", section.role_id));
            }
            if !seen_roles.insert(section.role_id.as_str()) {
                issues.push(format!("role_id '{}' appears twice", section.role_id));
            }
            for bullet in &section.bullets {
                if bullet.text.trim().is_empty() {
                    issues.push(format!("empty bullet in role '{}'", section.role_id));
                    continue;
                }
                if !is_verbatim(&bullet.text, &bullet.source_fact_ids, kb)
                    && !is_logged(&bullet.text, &self.reframing_log)
                {
                    issues.push(format!(
                        "bullet '{}' differs from its facts but has no reframing_log entry",
                        bullet.text
                    ));
                }
            }
        }
        for entry in &self.reframing_log {
            if entry.interview_note.trim().is_empty() {
                issues.push(format!("reframing_log entry for '{}' has no interview_note", entry.reframed));
            }
        }
        issues
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegeneratedBullet {
    text: String,
    source_fact_ids: Vec<String>,
    #[serde(default)]
    estimated_metric: bool,
    #[serde(default)]
    keywords_used: Vec<String>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    interview_note: String,
}

impl RegeneratedBullet {
    fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.text.trim().is_empty() {
            issues.push("text is empty".to_string());
        }
        if self.source_fact_ids.is_empty() {
            issues.push("source_fact_ids is empty".to_string());
        }
        if self.interview_note.trim().is_empty() {
            issues.push("interview_note is empty".to_string());
        }
        issues
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegeneratedSummary {
    summary: String,
    #[serde(default)]
    summary_fact_ids: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Public API
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReframeOutput {
    pub draft: ResumeDraft,
    /// New log entries produced by this call.
    pub log: Vec<ReframingLogEntry>,
    /// Violations left after unit regeneration. Never blocking unless a unit had no
    /// fallback at all.
    pub violations: Vec<RuleViolation>,
}

/// What the previous iteration got wrong, fed into a full redraft.
#[derive(Debug, Clone, Default)]
pub struct ReframeFeedback {
    pub previous_total: f64,
    pub component_scores: BTreeMap<ScoreComponent, f64>,
    pub focus: Option<ScoreComponent>,
    pub violations: Vec<String>,
    pub keyword_gaps: Vec<String>,
}

impl ReframeFeedback {
    pub fn render(&self) -> String {
        let components = self
            .component_scores
            .iter()
            .map(|(c, v)| format!("{c}={v:.1}"))
            .collect::<Vec<_>>()
            .join(", ");
        let violations = if self.violations.is_empty() {
            "- none".to_string()
        } else {
            self.violations
                .iter()
                .map(|v| format!("- {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        FEEDBACK_TEMPLATE
            .replace("{total}", &format!("{:.1}", self.previous_total))
            .replace(
                "{focus}",
                &self.focus.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
            )
            .replace("{components}", &components)
            .replace("{violations}", &violations)
            .replace("{keyword_gaps}", &list_or_none(&self.keyword_gaps))
    }
}

/// Writes a full draft, then lints and repairs it unit by unit.
pub async fn reframe(ctx: RunContext<'_>, feedback: Option<&ReframeFeedback>) -> Result<ReframeOutput, PipelineError> {
    let request = ModelRequest::new(REFRAME_SYSTEM, reframe_prompt(ctx, feedback), RESUME_DRAFT_SCHEMA);
    let generated: GeneratedResume = extract_with(ctx.model, &request, |g: &GeneratedResume| g.issues(ctx.kb))
        .await
        .map_err(|e| PipelineError::from_extract(Stage::Reframe, e))?;

    finalize(ctx, generated, Stage::Reframe).await
}

/// Assembly plus unit enforcement for any model-written draft.
pub(crate) async fn finalize(
    ctx: RunContext<'_>,
    generated: GeneratedResume,
    stage: Stage,
) -> Result<ReframeOutput, PipelineError> {
    let (mut draft, mut log) = assemble(ctx, generated);
    let violations = enforce(ctx, &mut draft, &mut log, stage).await?;
    info!(
        "{stage}: draft with {} roles / {} bullets, {} log entries, {} open violations",
        draft.sections.len(),
        draft.total_bullets(),
        log.len(),
        violations.len()
    );
    Ok(ReframeOutput {
        draft,
        log,
        violations,
    })
}

/// Rules whose violations make a bullet hard to read.
const READABILITY_RULES: &[&str] = &["banned_opener", "bullet_length", "duplicate_bullet"];

/// Bullets the weakest score component points at, each with the problem to fix.
fn component_targets(
    ctx: RunContext<'_>,
    draft: &ResumeDraft,
    focus: ScoreComponent,
) -> BTreeMap<BulletRef, Vec<RuleViolation>> {
    match focus {
        ScoreComponent::AchievementDensity => {
            problems_by_bullet(&lint_draft(draft, ctx.kb, ctx.jd), |v| v.rule == "missing_metric")
        }
        ScoreComponent::HumanReadability => {
            problems_by_bullet(&lint_draft(draft, ctx.kb, ctx.jd), |v| READABILITY_RULES.contains(&v.rule))
        }
        ScoreComponent::SemanticAlignment => {
            let priority: Vec<&String> = ctx.jd.p0_keywords.iter().chain(&ctx.jd.p1_keywords).collect();
            if priority.is_empty() {
                return BTreeMap::new();
            }
            let listed = priority.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ");
            draft
                .bullets()
                .filter(|(_, _, b)| !priority.iter().any(|k| contains_term(&b.text, k)))
                .map(|(at, _, _)| {
                    let problem = RuleViolation::new(
                        "off_target",
                        RuleClass::Lexical,
                        Location::Bullet(at),
                        format!("bullet mentions none of the role's priority requirements ({listed}); align it with one its facts support"),
                    );
                    (at, vec![problem])
                })
                .collect()
        }
        ScoreComponent::KeywordMatch | ScoreComponent::FormatCompliance => BTreeMap::new(),
    }
}

/// Targeted patch for one score component: regenerates only the bullets that component
/// flags and leaves every other unit of the draft as it was.
pub async fn patch_component(
    ctx: RunContext<'_>,
    draft: &ResumeDraft,
    focus: ScoreComponent,
) -> Result<ReframeOutput, PipelineError> {
    let mut draft = draft.clone();
    let mut log = Vec::new();
    let flagged = component_targets(ctx, &draft, focus);
    if flagged.is_empty() {
        info!("{focus} patch: no bullet to target, draft left as is");
    } else {
        debug!("{focus} patch: {} bullets targeted", flagged.len());
    }

    for (at, problems) in flagged.into_iter().rev() {
        repair_bullet(ctx, &mut draft, &mut log, at, &problems, Stage::Reframe).await?;
    }
    draft.sections.retain(|s| !s.bullets.is_empty());
    flag_estimates(&mut draft, &mut log, ctx.kb);

    let violations = lint_draft(&draft, ctx.kb, ctx.jd);
    Ok(ReframeOutput {
        draft,
        log,
        violations,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Prompt rendering
// ────────────────────────────────────────────────────────────────────────────

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn render_mapping(mapping: &MappingMatrix) -> String {
    mapping
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "{i}. [{:?}] {} -> {} ({}){}",
                e.requirement.priority,
                e.requirement.text,
                e.match_type,
                e.source_fact.as_deref().unwrap_or("-"),
                e.reframe_strategy
                    .as_deref()
                    .map(|s| format!(" via: {s}"))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_roles(kb: &dyn KnowledgeBase) -> String {
    kb.roles_by_recency()
        .iter()
        .map(|r| format!("{} | {} | {} | {}", r.id, r.title, r.company, r.dates.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_role_caps() -> String {
    let caps = ROLE_BULLET_CAPS
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{caps} (older roles {})", role_bullet_cap(usize::MAX))
}

fn reframe_prompt(ctx: RunContext<'_>, feedback: Option<&ReframeFeedback>) -> String {
    REFRAME_PROMPT
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{banned_openers}", &BANNED_OPENERS.join(", "))
        .replace("{preferred_verbs}", &PREFERRED_VERBS.join(", "))
        .replace("{role_caps}", &render_role_caps())
        .replace("{job_title}", &ctx.jd.job_title)
        .replace("{company}", &ctx.jd.company)
        .replace("{p0_keywords}", &list_or_none(&ctx.jd.p0_keywords))
        .replace("{p1_keywords}", &list_or_none(&ctx.jd.p1_keywords))
        .replace("{mapping}", &render_mapping(ctx.mapping))
        .replace("{roles}", &render_roles(ctx.kb))
        .replace("{facts}", &render_facts(ctx.kb.facts()))
        .replace(
            "{preferences}",
            &ctx.preferences.map(EditPreferences::render).unwrap_or_default(),
        )
        .replace("{feedback}", &feedback.map(ReframeFeedback::render).unwrap_or_default())
}

// ────────────────────────────────────────────────────────────────────────────
// Assembly
// ────────────────────────────────────────────────────────────────────────────

fn assemble(ctx: RunContext<'_>, generated: GeneratedResume) -> (ResumeDraft, Vec<ReframingLogEntry>) {
    let kb = ctx.kb;
    let mut seen_bullets = HashSet::new();
    let mut ranked: Vec<(usize, RoleSection)> = Vec::new();

    for section in generated.sections {
        let Some(role) = kb.role(&section.role_id) else {
            warn!("Dropping section for unknown role '{}'", section.role_id);
            continue;
        };
        let rank = kb.recency_rank(&role.id).unwrap_or(usize::MAX);
        let cap = role_bullet_cap(rank);
        let mut bullets: Vec<Bullet> = section
            .bullets
            .into_iter()
            .filter(|b| seen_bullets.insert(b.text.trim().to_lowercase()))
            .collect();
        if bullets.len() > cap {
            debug!("Truncating '{}' from {} to {cap} bullets", role.title, bullets.len());
            bullets.truncate(cap);
        }
        if bullets.is_empty() {
            warn!("Dropping section '{}' with no bullets", role.title);
            continue;
        }
        ranked.push((
            rank,
            RoleSection {
                role_id: role.id.clone(),
                title: role.title.clone(),
                company: role.company.clone(),
                dates: role.dates,
                bullets,
            },
        ));
    }
    ranked.sort_by_key(|(rank, _)| *rank);

    let mut skills = generated.skills;
    let mut seen_skills = HashSet::new();
    for group in [&mut skills.technical, &mut skills.methodologies, &mut skills.domains] {
        group.retain(|skill| {
            let grounded = kb.grounds_term(skill);
            if !grounded {
                warn!("Dropping ungrounded skill '{skill}'");
            }
            grounded && seen_skills.insert(skill.trim().to_lowercase())
        });
    }

    let presentation = standard_presentation(
        kb.candidate(),
        ctx.jd,
        !kb.education().is_empty(),
        !kb.certifications().is_empty(),
    );

    let mut draft = ResumeDraft {
        summary: generated.summary.trim().to_string(),
        summary_fact_ids: generated.summary_fact_ids,
        sections: ranked.into_iter().map(|(_, s)| s).collect(),
        skills,
        presentation,
    };
    let mut log = generated.reframing_log;
    flag_estimates(&mut draft, &mut log, kb);
    (draft, log)
}

/// Marks bullets whose metric has no backing in any cited fact, in the draft and in the log.
fn flag_estimates(draft: &mut ResumeDraft, log: &mut [ReframingLogEntry], kb: &dyn KnowledgeBase) {
    for section in &mut draft.sections {
        for bullet in &mut section.bullets {
            let backed = bullet
                .source_fact_ids
                .iter()
                .filter_map(|id| kb.fact(id))
                .any(|f| f.has_metric() || has_metric(&f.text));
            if has_metric(&bullet.text) && !backed {
                bullet.estimated_metric = true;
            }
            if bullet.estimated_metric {
                for entry in log.iter_mut().filter(|e| e.reframed.trim() == bullet.text.trim()) {
                    entry.metric_estimated = true;
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Unit enforcement
// ────────────────────────────────────────────────────────────────────────────

fn problems_by_bullet(
    violations: &[RuleViolation],
    include: impl Fn(&RuleViolation) -> bool,
) -> BTreeMap<BulletRef, Vec<RuleViolation>> {
    let mut out: BTreeMap<BulletRef, Vec<RuleViolation>> = BTreeMap::new();
    for v in violations.iter().filter(|v| include(v)) {
        if let Some(at) = v.bullet() {
            out.entry(at).or_default().push(v.clone());
        }
    }
    out
}

fn describe(problems: &[RuleViolation]) -> String {
    problems
        .iter()
        .map(|v| format!("- {}: {}", v.rule, v.message))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn enforce(
    ctx: RunContext<'_>,
    draft: &mut ResumeDraft,
    log: &mut Vec<ReframingLogEntry>,
    stage: Stage,
) -> Result<Vec<RuleViolation>, PipelineError> {
    let violations = lint_draft(draft, ctx.kb, ctx.jd);

    let summary_problems: Vec<RuleViolation> = violations
        .iter()
        .filter(|v| v.location == Location::Summary && v.is_blocking())
        .cloned()
        .collect();
    if !summary_problems.is_empty() {
        repair_summary(ctx, draft, &summary_problems, stage).await?;
    }

    // Descending order keeps earlier refs valid when a bullet is removed.
    let flagged = problems_by_bullet(&violations, |_| true);
    for (at, problems) in flagged.into_iter().rev() {
        repair_bullet(ctx, draft, log, at, &problems, stage).await?;
    }
    draft.sections.retain(|s| {
        if s.bullets.is_empty() {
            warn!("Section '{}' lost every bullet during enforcement", s.title);
        }
        !s.bullets.is_empty()
    });
    flag_estimates(draft, log, ctx.kb);

    Ok(lint_draft(draft, ctx.kb, ctx.jd))
}

fn violations_at(draft: &ResumeDraft, ctx: RunContext<'_>, at: BulletRef) -> Vec<RuleViolation> {
    lint_draft(draft, ctx.kb, ctx.jd)
        .into_iter()
        .filter(|v| v.bullet() == Some(at))
        .collect()
}

async fn repair_bullet(
    ctx: RunContext<'_>,
    draft: &mut ResumeDraft,
    log: &mut Vec<ReframingLogEntry>,
    at: BulletRef,
    problems: &[RuleViolation],
    stage: Stage,
) -> Result<(), PipelineError> {
    let Some(current) = draft.bullet(at).cloned() else {
        return Ok(());
    };
    let originally_blocking = problems.iter().any(RuleViolation::is_blocking);
    let mut problems = problems.to_vec();
    let mut acceptable: Option<RegeneratedBullet> = None;

    for attempt in 1..=MAX_UNIT_ATTEMPTS {
        let request = bullet_request(ctx, draft, at, &current, &problems);
        let candidate = match extract_with(ctx.model, &request, RegeneratedBullet::issues).await {
            Ok(candidate) => candidate,
            Err(ExtractError::Invalid(e)) => {
                debug!("Bullet regeneration attempt {attempt} unusable: {e}");
                continue;
            }
            Err(ExtractError::Model(e)) => return Err(PipelineError::from_llm(stage, e)),
        };

        let mut trial = draft.clone();
        if let Some(slot) = trial.bullet_mut(at) {
            *slot = Bullet {
                text: candidate.text.trim().to_string(),
                source_fact_ids: candidate.source_fact_ids.clone(),
                estimated_metric: candidate.estimated_metric,
            };
        }
        let remaining = violations_at(&trial, ctx, at);
        if remaining.is_empty() {
            acceptable = Some(candidate);
            break;
        }
        if !remaining.iter().any(RuleViolation::is_blocking) && acceptable.is_none() {
            acceptable = Some(candidate);
        }
        debug!(
            "Bullet regeneration attempt {attempt} left {} violations",
            remaining.len()
        );
        problems = remaining;
    }

    if let Some(candidate) = acceptable {
        accept_bullet(ctx.kb, draft, log, at, candidate);
        return Ok(());
    }
    if !originally_blocking {
        debug!("Keeping bullet with lexical issues: {}", current.text);
        return Ok(());
    }

    match fallback_fact(ctx.kb, draft, at, &current) {
        Some(fact) => {
            warn!("Falling back to literal fact '{}' for an ungroundable bullet", fact.id);
            log.push(ReframingLogEntry {
                original: fact.text.clone(),
                reframed: fact.text.clone(),
                keywords_used: vec![],
                rationale: format!("fallback to recorded fact text; rewrite failed: {}", current.text),
                interview_note: "Quoted verbatim from the candidate's record.".to_string(),
                metric_estimated: false,
            });
            if let Some(slot) = draft.bullet_mut(at) {
                *slot = Bullet {
                    text: fact.text.clone(),
                    source_fact_ids: vec![fact.id.clone()],
                    estimated_metric: false,
                };
            }
        }
        None => {
            warn!("No fact left to ground bullet '{}'; removing it", current.text);
            if let Some(section) = draft.sections.get_mut(at.section) {
                if at.bullet < section.bullets.len() {
                    section.bullets.remove(at.bullet);
                }
            }
        }
    }
    Ok(())
}

fn bullet_request(
    ctx: RunContext<'_>,
    draft: &ResumeDraft,
    at: BulletRef,
    current: &Bullet,
    problems: &[RuleViolation],
) -> ModelRequest {
    let section = &draft.sections[at.section.min(draft.sections.len().saturating_sub(1))];
    let facts = ctx
        .kb
        .facts()
        .iter()
        .filter(|f| f.role_id.as_deref().map_or(true, |r| r == section.role_id));
    let prompt = BULLET_REGEN_PROMPT
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{problems}", &describe(problems))
        .replace("{current}", &current.text)
        .replace("{role_title}", &section.title)
        .replace("{company}", &section.company)
        .replace("{dates}", &section.dates.display())
        .replace("{facts}", &render_facts(facts))
        .replace("{banned_openers}", &BANNED_OPENERS.join(", "));
    ModelRequest::new(REFRAME_SYSTEM, prompt, BULLET_SCHEMA)
}

fn accept_bullet(
    kb: &dyn KnowledgeBase,
    draft: &mut ResumeDraft,
    log: &mut Vec<ReframingLogEntry>,
    at: BulletRef,
    candidate: RegeneratedBullet,
) {
    let text = candidate.text.trim().to_string();
    if !is_verbatim(&text, &candidate.source_fact_ids, kb) {
        let original = candidate
            .source_fact_ids
            .iter()
            .filter_map(|id| kb.fact(id))
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" / ");
        log.push(ReframingLogEntry {
            original,
            reframed: text.clone(),
            keywords_used: candidate.keywords_used,
            rationale: candidate.rationale,
            interview_note: candidate.interview_note,
            metric_estimated: candidate.estimated_metric,
        });
    }
    if let Some(slot) = draft.bullet_mut(at) {
        *slot = Bullet {
            text,
            source_fact_ids: candidate.source_fact_ids,
            estimated_metric: candidate.estimated_metric,
        };
    }
}

/// Literal bullet fact for the section's role: one the bullet cited first, then any
/// other, skipping facts whose text is already on the page.
fn fallback_fact<'a>(
    kb: &'a dyn KnowledgeBase,
    draft: &ResumeDraft,
    at: BulletRef,
    current: &Bullet,
) -> Option<&'a ProfileFact> {
    let role_id = &draft.sections.get(at.section)?.role_id;
    let used: HashSet<&str> = draft.bullets().map(|(_, _, b)| b.text.trim()).collect();
    let usable = |f: &&ProfileFact| {
        f.kind == FactKind::Bullet
            && f.role_id.as_deref() == Some(role_id.as_str())
            && !used.contains(f.text.trim())
    };

    current
        .source_fact_ids
        .iter()
        .filter_map(|id| kb.fact(id))
        .find(usable)
        .or_else(|| kb.facts().iter().find(usable))
}

async fn repair_summary(
    ctx: RunContext<'_>,
    draft: &mut ResumeDraft,
    problems: &[RuleViolation],
    stage: Stage,
) -> Result<(), PipelineError> {
    let mut problems = problems.to_vec();
    for attempt in 1..=MAX_UNIT_ATTEMPTS {
        let prompt = SUMMARY_REGEN_PROMPT
            .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
            .replace("{problems}", &describe(&problems))
            .replace("{job_title}", &ctx.jd.job_title)
            .replace("{company}", &ctx.jd.company)
            .replace("{facts}", &render_facts(ctx.kb.facts()));
        let request = ModelRequest::new(REFRAME_SYSTEM, prompt, SUMMARY_SCHEMA);
        let validate = |s: &RegeneratedSummary| {
            if s.summary.trim().is_empty() {
                vec!["summary is empty".to_string()]
            } else {
                vec![]
            }
        };
        let candidate = match extract_with(ctx.model, &request, validate).await {
            Ok(candidate) => candidate,
            Err(ExtractError::Invalid(e)) => {
                debug!("Summary regeneration attempt {attempt} unusable: {e}");
                continue;
            }
            Err(ExtractError::Model(e)) => return Err(PipelineError::from_llm(stage, e)),
        };

        let mut trial = draft.clone();
        trial.summary = candidate.summary.trim().to_string();
        trial.summary_fact_ids = candidate.summary_fact_ids;
        let remaining: Vec<RuleViolation> = lint_draft(&trial, ctx.kb, ctx.jd)
            .into_iter()
            .filter(|v| v.location == Location::Summary && v.is_blocking())
            .collect();
        if remaining.is_empty() {
            draft.summary = trial.summary;
            draft.summary_fact_ids = trial.summary_fact_ids;
            return Ok(());
        }
        problems = remaining;
    }

    match fallback_summary(ctx.kb) {
        Some((summary, ids)) => {
            warn!("Summary could not be grounded; using the fallback built from the latest role");
            draft.summary = summary;
            draft.summary_fact_ids = ids;
        }
        None => warn!("Summary could not be grounded and the knowledge base has no facts"),
    }
    Ok(())
}

/// Latest role title plus its first recorded bullet fact.
fn fallback_summary(kb: &dyn KnowledgeBase) -> Option<(String, Vec<String>)> {
    let roles = kb.roles_by_recency();
    let latest = roles.first();
    let fact = latest
        .and_then(|role| {
            kb.facts()
                .iter()
                .find(|f| f.kind == FactKind::Bullet && f.role_id.as_deref() == Some(role.id.as_str()))
        })
        .or_else(|| kb.facts().iter().find(|f| f.kind == FactKind::Bullet))
        .or_else(|| kb.facts().first())?;
    let summary = match latest {
        Some(role) => format!("{} at {}. {}", role.title, role.company, fact.text),
        None => fact.text.clone(),
    };
    Some((summary, vec![fact.id.clone()]))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::knowledge::fixtures::knowledge_base;
    use crate::llm_client::testing::{Reply, ScriptedModel};
    use crate::models::jd::fixtures::jd_record;
    use crate::models::resume::fixtures::{bullet, draft, section};
    use serde_json::json;

    fn ctx<'a>(
        model: &'a ScriptedModel,
        kb: &'a dyn KnowledgeBase,
        jd: &'a crate::models::jd::JdRecord,
        mapping: &'a MappingMatrix,
    ) -> RunContext<'a> {
        RunContext {
            model,
            kb,
            jd,
            mapping,
            preferences: None,
        }
    }

    #[tokio::test]
    async fn test_reframe_assembles_grounded_draft() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL", "A/B testing"], &["Amplitude"], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new().reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_F3, "f3")]));

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        assert_eq!(model.call_count(), 1);
        assert!(out.violations.is_empty(), "{:?}", out.violations);
        let ids: Vec<_> = out.draft.sections.iter().map(|s| s.role_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(out.draft.sections[0].title, "Senior Product Manager");
        assert_eq!(out.draft.skills.technical, vec!["SQL", "Amplitude"]);
        assert_eq!(out.draft.presentation.filename, "Jane_Doe_Resume_AcmeCorp.pdf");
        assert!(out.draft.presentation.section_headers.contains(&"EDUCATION".to_string()));
        assert_eq!(out.log.len(), 3);
    }

    #[tokio::test]
    async fn test_estimated_metric_flagged_in_draft_and_log() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new().reply(
            RESUME_DRAFT_SCHEMA.name,
            resume_reply(&[(R2_F3, "f3"), (R2_F4_ESTIMATE, "f4")]),
        );

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        let estimate = out.draft.sections[1]
            .bullets
            .iter()
            .find(|b| b.text == R2_F4_ESTIMATE)
            .unwrap();
        assert!(estimate.estimated_metric);
        let entry = out.log.iter().find(|e| e.reframed == R2_F4_ESTIMATE).unwrap();
        assert!(entry.metric_estimated);
        // f3 carries a number, so its rewrite is not an estimate.
        assert!(!out.draft.sections[1].bullets[0].estimated_metric);
    }

    #[tokio::test]
    async fn test_temporal_bullet_regenerated_alone() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_TEMPORAL, "f3")]))
            .reply(BULLET_SCHEMA.name, bullet_reply(R2_F3, "f3", false));

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        assert_eq!(model.calls_for(RESUME_DRAFT_SCHEMA.name), 1);
        assert_eq!(model.calls_for(BULLET_SCHEMA.name), 1);
        assert_eq!(out.draft.sections[1].bullets[0].text, R2_F3);
        assert!(out.violations.iter().all(|v| !v.is_blocking()));
        let entry = out.log.iter().rev().find(|e| e.reframed == R2_F3).unwrap();
        assert!(entry.original.starts_with("Ran SQL cohort analysis"));
        // The draft's other bullets were never sent back to the model.
        let regen_prompt = &model.calls()[1].prompt;
        assert!(regen_prompt.contains("temporal_claim"));
        assert!(!regen_prompt.contains(R1_F1));
    }

    #[tokio::test]
    async fn test_unfixable_bullet_falls_back_to_fact_text() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_TEMPORAL, "f3")]))
            .reply(BULLET_SCHEMA.name, bullet_reply(R2_TEMPORAL, "f3", false));

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        assert_eq!(model.calls_for(BULLET_SCHEMA.name), MAX_UNIT_ATTEMPTS);
        let fallback = &out.draft.sections[1].bullets[0];
        assert_eq!(fallback.text, kb.fact("f3").unwrap().text);
        assert_eq!(fallback.source_fact_ids, vec!["f3"]);
        let noted = out.log.iter().find(|e| e.reframed == fallback.text).unwrap();
        assert!(noted.rationale.starts_with("fallback to recorded fact text"));
        assert!(out.violations.iter().all(|v| !v.is_blocking()), "{:?}", out.violations);
    }

    #[tokio::test]
    async fn test_ungrounded_summary_falls_back() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let mut reply = resume_reply(&[(R2_F3, "f3")]);
        reply["summary_fact_ids"] = json!([]);
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, reply)
            .reply(SUMMARY_SCHEMA.name, json!({"summary": "Visionary leader", "summary_fact_ids": ["f404"]}));

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        assert_eq!(model.calls_for(SUMMARY_SCHEMA.name), MAX_UNIT_ATTEMPTS);
        assert_eq!(out.draft.summary_fact_ids, vec!["f1"]);
        assert!(out.draft.summary.starts_with("Senior Product Manager at Company r1."));
        assert!(out.violations.iter().all(|v| v.location != Location::Summary));
    }

    #[tokio::test]
    async fn test_unknown_role_gets_one_repair() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let mut bad = resume_reply(&[(R2_F3, "f3")]);
        bad["sections"][0]["role_id"] = json!("r9");
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, bad)
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_F3, "f3")]));

        let out = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        assert_eq!(model.calls_for(RESUME_DRAFT_SCHEMA.name), 2);
        assert!(model.calls()[1].prompt.contains("unknown role_id 'r9'"));
        assert_eq!(out.draft.sections.len(), 2);
    }

    #[test]
    fn test_altered_bullet_needs_log_entry() {
        let kb = knowledge_base();
        let mut reply = resume_reply(&[(R2_F3, "f3")]);
        reply["reframing_log"] = json!([]);
        let generated: GeneratedResume = serde_json::from_value(reply).unwrap();
        let issues = generated.issues(&kb);
        assert_eq!(issues.len(), 3, "{issues:?}");

        // Quoting the fact verbatim needs no log entry.
        let verbatim = json!({
            "summary": SUMMARY,
            "sections": [{"role_id": "r2", "bullets": [
                {"text": kb.fact("f3").unwrap().text, "source_fact_ids": ["f3"]}
            ]}]
        });
        let generated: GeneratedResume = serde_json::from_value(verbatim).unwrap();
        assert!(generated.issues(&kb).is_empty());
    }

    #[tokio::test]
    async fn test_bullet_timeout_surfaces_as_stage_timeout() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_TEMPORAL, "f3")]))
            .reply_with(BULLET_SCHEMA.name, Reply::Timeout);

        let err = reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { stage: Stage::Reframe }));
    }

    #[tokio::test]
    async fn test_feedback_reaches_prompt() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let model = ScriptedModel::new().reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_F3, "f3")]));
        let feedback = ReframeFeedback {
            previous_total: 72.0,
            component_scores: BTreeMap::from([(ScoreComponent::KeywordMatch, 55.0)]),
            focus: Some(ScoreComponent::KeywordMatch),
            violations: vec!["bullet_length: too short".to_string()],
            keyword_gaps: vec!["Amplitude".to_string()],
        };

        reframe(ctx(&model, &kb, &jd, &mapping), Some(&feedback)).await.unwrap();

        let prompt = &model.calls()[0].prompt;
        assert!(prompt.contains("scored 72.0/100"));
        assert!(prompt.contains("Weakest component: keyword_match"));
        assert!(prompt.contains("- bullet_length: too short"));
        assert!(prompt.contains("Keyword gaps: Amplitude"));
    }

    #[tokio::test]
    async fn test_edit_preferences_reach_prompt_only_when_present() {
        use crate::pipeline::preferences::{EditPreferences, EditedContent, HumanEdit};

        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let prefs = EditPreferences::from_edits(&[HumanEdit {
            before: EditedContent {
                summary: "Results-driven PM".to_string(),
                ..EditedContent::default()
            },
            after: EditedContent {
                summary: "Product manager for B2B onboarding".to_string(),
                ..EditedContent::default()
            },
        }]);
        let model = ScriptedModel::new()
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_F3, "f3")]))
            .reply(RESUME_DRAFT_SCHEMA.name, resume_reply(&[(R2_F3, "f3")]));

        let with_prefs = RunContext {
            preferences: Some(&prefs),
            ..ctx(&model, &kb, &jd, &mapping)
        };
        reframe(with_prefs, None).await.unwrap();
        reframe(ctx(&model, &kb, &jd, &mapping), None).await.unwrap();

        let calls: Vec<_> = model
            .calls()
            .into_iter()
            .filter(|c| c.schema.name == RESUME_DRAFT_SCHEMA.name)
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].prompt.contains("USER PREFERENCES (from your past corrections"));
        assert!(calls[0]
            .prompt
            .contains("User changed summary: \"Results-driven PM\" to \"Product manager for B2B onboarding\""));
        assert!(!calls[1].prompt.contains("USER PREFERENCES"));
        assert!(!calls[1].prompt.contains("{preferences}"));
    }

    #[tokio::test]
    async fn test_achievement_patch_only_touches_metricless_bullets() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let f4 = kb.fact("f4").unwrap().text.clone();
        let mut d = draft(
            SUMMARY,
            vec![
                section("r1", (2022, 3), None, vec![bullet(R1_F1, &["f1"])]),
                section("r2", (2018, 1), Some((2021, 12)), vec![bullet(&f4, &["f4"])]),
            ],
            &["SQL"],
        );
        d.summary_fact_ids = vec!["f1".to_string()];
        let model = ScriptedModel::new().reply(BULLET_SCHEMA.name, bullet_reply(R2_F4_ESTIMATE, "f4", true));

        let out = patch_component(ctx(&model, &kb, &jd, &mapping), &d, ScoreComponent::AchievementDensity)
            .await
            .unwrap();

        assert_eq!(model.calls_for(BULLET_SCHEMA.name), 1);
        assert_eq!(out.draft.sections[0].bullets[0].text, R1_F1);
        let patched = &out.draft.sections[1].bullets[0];
        assert_eq!(patched.text, R2_F4_ESTIMATE);
        assert!(patched.estimated_metric);
        assert_eq!(out.log.len(), 1);
        assert!(out.log[0].metric_estimated);
        assert_eq!(out.log[0].original, f4);
    }

    #[tokio::test]
    async fn test_semantic_patch_rewrites_only_off_target_bullets() {
        const PLAIN_F2: &str = "Built support tooling for 3 product lines, cutting wait times 35% and freeing \
            two engineers for proactive customer work across the quarter";
        let kb = knowledge_base();
        let jd = jd_record(&["onboarding", "SQL", "triage"], &[], &[]);
        let mapping = empty_mapping();
        let mut d = draft(
            SUMMARY,
            vec![
                section("r1", (2022, 3), None, vec![bullet(R1_F1, &["f1"]), bullet(PLAIN_F2, &["f2"])]),
                section("r2", (2018, 1), Some((2021, 12)), vec![bullet(R2_F3, &["f3"])]),
            ],
            &["SQL"],
        );
        d.summary_fact_ids = vec!["f1".to_string(), "f3".to_string()];
        let model = ScriptedModel::new().reply(BULLET_SCHEMA.name, bullet_reply(R1_F2, "f2", false));

        let out = patch_component(ctx(&model, &kb, &jd, &mapping), &d, ScoreComponent::SemanticAlignment)
            .await
            .unwrap();

        assert_eq!(model.call_count(), 1);
        let prompt = &model.calls()[0].prompt;
        assert!(prompt.contains("off_target"));
        assert!(prompt.contains(PLAIN_F2));
        assert!(!prompt.contains(R1_F1));
        assert!(!prompt.contains(R2_F3));

        assert_eq!(out.draft.sections[0].bullets[0].text, R1_F1);
        assert_eq!(out.draft.sections[0].bullets[1].text, R1_F2);
        assert_eq!(out.draft.sections[1].bullets[0].text, R2_F3);
        assert_eq!(out.draft.summary, d.summary);
        assert_eq!(out.log.len(), 1);
        assert_eq!(out.log[0].reframed, R1_F2);
    }

    #[tokio::test]
    async fn test_readability_patch_targets_lexical_violations() {
        let kb = knowledge_base();
        let jd = jd_record(&["SQL"], &[], &[]);
        let mapping = empty_mapping();
        let helped = "Helped run SQL cohort analysis on churn for 12 enterprise accounts";
        let mut d = draft(
            SUMMARY,
            vec![
                section("r1", (2022, 3), None, vec![bullet(R1_F1, &["f1"])]),
                section("r2", (2018, 1), Some((2021, 12)), vec![bullet(helped, &["f3"])]),
            ],
            &["SQL"],
        );
        d.summary_fact_ids = vec!["f1".to_string()];
        let model = ScriptedModel::new().reply(BULLET_SCHEMA.name, bullet_reply(R2_F3, "f3", false));

        let out = patch_component(ctx(&model, &kb, &jd, &mapping), &d, ScoreComponent::HumanReadability)
            .await
            .unwrap();

        assert_eq!(model.calls_for(BULLET_SCHEMA.name), 1);
        assert!(model.calls()[0].prompt.contains("banned_opener"));
        assert_eq!(out.draft.sections[0].bullets[0].text, R1_F1);
        assert_eq!(out.draft.sections[1].bullets[0].text, R2_F3);
    }
}
