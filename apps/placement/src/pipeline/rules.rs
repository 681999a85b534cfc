//! Content policy as data. Verb lists, temporal-claim rules, bullet bounds and per-role
//! caps are tables; `lint_draft` is the one generic linter that evaluates them.
//!
//! The generative stages are asked to follow the same tables, but nothing they produce
//! is trusted until it passes through here.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::knowledge::KnowledgeBase;
use crate::models::jd::JdRecord;
use crate::models::profile::{DateRange, FactKind, ProfileFact};
use crate::models::resume::{BulletRef, ResumeDraft, RoleSection};

// ────────────────────────────────────────────────────────────────────────────
// Rule tables
// ────────────────────────────────────────────────────────────────────────────

/// Generic task phrasing that may never open a bullet.
pub const BANNED_OPENERS: &[&str] = &[
    "responsible for",
    "helped",
    "assisted",
    "worked on",
    "participated in",
    "involved in",
    "tasked with",
    "duties included",
    "handled",
    "supported",
    "utilized",
];

/// Outcome verbs the model is asked to prefer.
pub const PREFERRED_VERBS: &[&str] = &[
    "Increased",
    "Reduced",
    "Grew",
    "Cut",
    "Launched",
    "Shipped",
    "Delivered",
    "Drove",
    "Accelerated",
    "Generated",
    "Saved",
    "Scaled",
    "Negotiated",
    "Led",
    "Built",
];

/// A technology category whose claims are implausible before `earliest_year`.
#[derive(Debug, Clone, Copy)]
pub struct TemporalRule {
    pub category: &'static str,
    pub terms: &'static [&'static str],
    pub earliest_year: i32,
}

pub const TEMPORAL_RULES: &[TemporalRule] = &[
    TemporalRule {
        category: "generative_ai",
        terms: &[
            "generative ai",
            "genai",
            "gen ai",
            "llm",
            "llms",
            "large language model",
            "large language models",
            "chatgpt",
            "gpt-4",
            "prompt engineering",
            "ai agents",
            "rag",
        ],
        earliest_year: 2023,
    },
    TemporalRule {
        category: "container_orchestration",
        terms: &["kubernetes", "k8s"],
        earliest_year: 2015,
    },
    TemporalRule {
        category: "infrastructure_as_code",
        terms: &["terraform"],
        earliest_year: 2014,
    },
    TemporalRule {
        category: "analytics_engineering",
        terms: &["dbt"],
        earliest_year: 2016,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBounds {
    pub min: usize,
    pub max: usize,
    /// Slack on either side before a bullet is flagged.
    pub tolerance: usize,
}

pub const BULLET_WORDS: WordBounds = WordBounds {
    min: 20,
    max: 30,
    tolerance: 4,
};

/// Max bullets per role by recency rank (0 = most recent). Older roles use the last entry.
pub const ROLE_BULLET_CAPS: &[usize] = &[5, 3, 2];

pub fn role_bullet_cap(recency_rank: usize) -> usize {
    ROLE_BULLET_CAPS
        .get(recency_rank)
        .or(ROLE_BULLET_CAPS.last())
        .copied()
        .unwrap_or(2)
}

// ────────────────────────────────────────────────────────────────────────────
// Violations
// ────────────────────────────────────────────────────────────────────────────

/// What a violation threatens. Grounding and temporal violations may never reach the
/// output package; lexical and format violations are quality shortfalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    Grounding,
    Temporal,
    Lexical,
    Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Summary,
    Bullet(BulletRef),
    Section { section: usize },
    Skills,
    Presentation,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleViolation {
    pub rule: &'static str,
    pub class: RuleClass,
    pub location: Location,
    pub message: String,
}

impl RuleViolation {
    pub fn new(rule: &'static str, class: RuleClass, location: Location, message: impl Into<String>) -> Self {
        Self {
            rule,
            class,
            location,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.class, RuleClass::Grounding | RuleClass::Temporal)
    }

    pub fn bullet(&self) -> Option<BulletRef> {
        match self.location {
            Location::Bullet(at) => Some(at),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Term matching
// ────────────────────────────────────────────────────────────────────────────

/// Byte offsets (in the lowercased haystack) of case-insensitive, word-bounded matches.
fn term_matches(haystack: &str, term: &str) -> Vec<usize> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let hay = haystack.to_lowercase();
    hay.match_indices(&needle)
        .filter(|(start, m)| {
            let before = hay[..*start].chars().next_back();
            let after = hay[start + m.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
        .map(|(start, _)| start)
        .collect()
}

pub fn count_term(haystack: &str, term: &str) -> usize {
    term_matches(haystack, term).len()
}

pub fn contains_term(haystack: &str, term: &str) -> bool {
    !term_matches(haystack, term).is_empty()
}

/// True when the text carries a quantified outcome: a number, percentage or currency.
pub fn has_metric(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_ascii_digit() || matches!(c, '%' | '$' | '€' | '£'))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn banned_opener(text: &str) -> Option<&'static str> {
    let lowered = text.trim_start().to_lowercase();
    BANNED_OPENERS.iter().copied().find(|opener| {
        lowered.starts_with(opener)
            && !lowered[opener.len()..]
                .chars()
                .next()
                .is_some_and(char::is_alphanumeric)
    })
}

/// Temporal rule terms the text asserts although the role ended before they existed.
pub fn temporal_conflicts(text: &str, dates: &DateRange) -> Vec<(&'static TemporalRule, &'static str)> {
    let Some(last_year) = dates.last_year() else {
        return Vec::new();
    };
    TEMPORAL_RULES
        .iter()
        .filter(|rule| last_year < rule.earliest_year)
        .flat_map(|rule| {
            rule.terms
                .iter()
                .filter(|term| contains_term(text, term))
                .map(move |term| (rule, *term))
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Linter
// ────────────────────────────────────────────────────────────────────────────

/// Lexical checks for one bullet.
pub fn lint_bullet(text: &str, location: Location) -> Vec<RuleViolation> {
    let mut out = Vec::new();

    if let Some(opener) = banned_opener(text) {
        out.push(RuleViolation::new(
            "banned_opener",
            RuleClass::Lexical,
            location,
            format!("bullet opens with generic task phrase '{opener}'"),
        ));
    }
    if !has_metric(text) {
        out.push(RuleViolation::new(
            "missing_metric",
            RuleClass::Lexical,
            location,
            "bullet carries no quantified metric",
        ));
    }
    let words = word_count(text);
    let min = BULLET_WORDS.min.saturating_sub(BULLET_WORDS.tolerance);
    let max = BULLET_WORDS.max + BULLET_WORDS.tolerance;
    if words < min || words > max {
        out.push(RuleViolation::new(
            "bullet_length",
            RuleClass::Lexical,
            location,
            format!(
                "bullet has {words} words, expected {}-{}",
                BULLET_WORDS.min, BULLET_WORDS.max
            ),
        ));
    }
    out
}

/// Terms that count as skill/tool claims: hard skills, tools, certifications from the
/// JD, every skill and tool the knowledge base records, and every temporal rule term.
pub fn claim_vocabulary(jd: &JdRecord, kb: &dyn KnowledgeBase) -> Vec<String> {
    let mut seen = HashSet::new();
    jd.hard_skills
        .iter()
        .chain(&jd.tools_and_platforms)
        .chain(&jd.certifications)
        .map(|r| r.text.clone())
        .chain(
            kb.facts()
                .iter()
                .filter(|f| matches!(f.kind, FactKind::Skill | FactKind::Tool))
                .map(|f| f.text.clone()),
        )
        .chain(
            TEMPORAL_RULES
                .iter()
                .flat_map(|r| r.terms.iter().map(|t| t.to_string())),
        )
        .filter(|t| !t.trim().is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}

/// Capitalised business shorthand that names no skill or tool.
pub const GENERIC_CAPITALISED: &[&str] = &[
    "ARR", "MRR", "KPI", "KPIs", "OKR", "OKRs", "ROI", "NPS", "B2B", "B2C", "SaaS", "CEO", "CTO",
    "CFO", "COO", "CPO", "VP", "Q1", "Q2", "Q3", "Q4", "US", "EU", "UK", "EMEA", "APAC", "LATAM",
];

fn capitalised_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b[A-Z][A-Za-z0-9]*[+#]*").ok())
        .as_ref()
}

/// Proper-noun-like tokens: capitalised words and acronyms that are not the titlecased
/// first word of a sentence and not in `allowed`.
pub fn capitalised_terms(text: &str, allowed: &HashSet<String>) -> Vec<String> {
    let Some(re) = capitalised_pattern() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(text)
        .filter(|m| m.as_str().chars().count() > 1)
        .filter(|m| {
            let token = m.as_str();
            let sentence_start = text[..m.start()]
                .trim_end()
                .chars()
                .next_back()
                .map_or(true, |c| matches!(c, '.' | ':' | ';' | '!' | '?'));
            let titlecase = token.chars().skip(1).all(|c| !c.is_uppercase());
            !(sentence_start && titlecase)
        })
        .map(|m| m.as_str().to_string())
        .filter(|t| !allowed.contains(&t.to_lowercase()))
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

fn facts_record(facts: &[&ProfileFact], term: &str) -> bool {
    facts
        .iter()
        .any(|f| contains_term(&f.text, term) || f.metrics.iter().any(|m| contains_term(m, term)))
}

/// Lowercased words a bullet may capitalise without naming a tool: business shorthand,
/// preferred verbs, the section's own title and company, and both forms of any JD
/// abbreviation the cited facts already record.
fn allowed_capitalised(section: &RoleSection, facts: &[&ProfileFact], jd: &JdRecord) -> HashSet<String> {
    let mut allowed: HashSet<String> = GENERIC_CAPITALISED
        .iter()
        .chain(PREFERRED_VERBS)
        .map(|w| w.to_lowercase())
        .collect();
    allowed.extend(
        section
            .title
            .split_whitespace()
            .chain(section.company.split_whitespace())
            .map(str::to_lowercase),
    );
    for pair in &jd.abbreviations {
        if facts_record(facts, &pair.full) || facts_record(facts, &pair.short) {
            allowed.extend(
                pair.full
                    .split_whitespace()
                    .chain(pair.short.split_whitespace())
                    .map(str::to_lowercase),
            );
        }
    }
    allowed
}

/// Evaluates every content rule against a draft.
pub fn lint_draft(draft: &ResumeDraft, kb: &dyn KnowledgeBase, jd: &JdRecord) -> Vec<RuleViolation> {
    let vocabulary = claim_vocabulary(jd, kb);
    let mut out = Vec::new();

    // Summary
    if draft.summary_fact_ids.is_empty() {
        out.push(RuleViolation::new(
            "ungrounded_claim",
            RuleClass::Grounding,
            Location::Summary,
            "summary cites no source facts",
        ));
    }
    for id in &draft.summary_fact_ids {
        if kb.fact(id).is_none() {
            out.push(RuleViolation::new(
                "unknown_fact",
                RuleClass::Grounding,
                Location::Summary,
                format!("summary cites unknown fact '{id}'"),
            ));
        }
    }
    // The summary may draw on its own facts plus the profile-wide skills and credentials.
    let summary_facts: Vec<&ProfileFact> = kb
        .facts()
        .iter()
        .filter(|f| {
            draft.summary_fact_ids.contains(&f.id)
                || (f.role_id.is_none() && matches!(f.kind, FactKind::Skill | FactKind::Tool))
        })
        .collect();
    let credential = |term: &str| {
        kb.certifications()
            .iter()
            .chain(kb.education())
            .any(|c| contains_term(c, term))
    };
    for term in &vocabulary {
        if contains_term(&draft.summary, term) && !facts_record(&summary_facts, term) && !credential(term) {
            out.push(RuleViolation::new(
                "ungrounded_claim",
                RuleClass::Grounding,
                Location::Summary,
                format!("summary claims '{term}' which no recorded fact supports"),
            ));
        }
    }

    // Sections and bullets
    let mut seen_bullets: HashSet<String> = HashSet::new();
    for (s, section) in draft.sections.iter().enumerate() {
        let cap = kb
            .recency_rank(&section.role_id)
            .map(role_bullet_cap)
            .unwrap_or(ROLE_BULLET_CAPS[ROLE_BULLET_CAPS.len() - 1]);
        if section.bullets.len() > cap {
            out.push(RuleViolation::new(
                "role_bullet_cap",
                RuleClass::Lexical,
                Location::Section { section: s },
                format!(
                    "{} bullets for '{}', cap is {cap}",
                    section.bullets.len(),
                    section.title
                ),
            ));
        }

        for (b, bullet) in section.bullets.iter().enumerate() {
            let at = Location::Bullet(BulletRef { section: s, bullet: b });
            out.extend(lint_bullet(&bullet.text, at));

            if !seen_bullets.insert(bullet.text.trim().to_lowercase()) {
                out.push(RuleViolation::new(
                    "duplicate_bullet",
                    RuleClass::Lexical,
                    at,
                    "bullet duplicates an earlier bullet",
                ));
            }

            if bullet.source_fact_ids.is_empty() {
                out.push(RuleViolation::new(
                    "ungrounded_claim",
                    RuleClass::Grounding,
                    at,
                    "bullet cites no source facts",
                ));
            }
            for id in &bullet.source_fact_ids {
                match kb.fact(id) {
                    None => out.push(RuleViolation::new(
                        "unknown_fact",
                        RuleClass::Grounding,
                        at,
                        format!("bullet cites unknown fact '{id}'"),
                    )),
                    Some(fact) => {
                        let foreign_role = fact.kind == FactKind::Bullet
                            && fact.role_id.as_deref() != Some(section.role_id.as_str());
                        if foreign_role {
                            out.push(RuleViolation::new(
                                "foreign_fact",
                                RuleClass::Grounding,
                                at,
                                format!("fact '{id}' belongs to a different role"),
                            ));
                        }
                    }
                }
            }

            // A bullet quoting one of its own facts verbatim is ground truth.
            let verbatim = bullet
                .source_fact_ids
                .iter()
                .filter_map(|id| kb.fact(id))
                .any(|f| f.text.trim() == bullet.text.trim());
            if verbatim {
                continue;
            }

            // Every skill or tool the bullet names must be recorded by a fact it cites.
            let cited: Vec<&ProfileFact> = bullet.source_fact_ids.iter().filter_map(|id| kb.fact(id)).collect();
            let allowed = allowed_capitalised(section, &cited, jd);
            let mut named: Vec<String> = vocabulary
                .iter()
                .filter(|term| contains_term(&bullet.text, term))
                .cloned()
                .collect();
            for term in capitalised_terms(&bullet.text, &allowed) {
                if !named.iter().any(|n| n.eq_ignore_ascii_case(&term)) {
                    named.push(term);
                }
            }
            for term in named {
                if !facts_record(&cited, &term) {
                    out.push(RuleViolation::new(
                        "ungrounded_claim",
                        RuleClass::Grounding,
                        at,
                        format!("bullet names '{term}' which none of its cited facts records"),
                    ));
                }
            }

            for (rule, term) in temporal_conflicts(&bullet.text, &section.dates) {
                out.push(RuleViolation::new(
                    "temporal_claim",
                    RuleClass::Temporal,
                    at,
                    format!(
                        "'{term}' ({}) asserted for a role ending {}, before {}",
                        rule.category,
                        section.dates.display(),
                        rule.earliest_year
                    ),
                ));
            }
        }
    }

    // Skills
    for skill in draft.skills.iter() {
        if !kb.grounds_term(skill) {
            out.push(RuleViolation::new(
                "ungrounded_skill",
                RuleClass::Grounding,
                Location::Skills,
                format!("skill '{skill}' is not in the knowledge base"),
            ));
        }
    }

    out
}
