// Prompt templates and output schemas for the pipeline stages.
// Placeholders are `{name}` and are filled with `.replace`.

use crate::llm_client::OutputSchema;
use crate::models::profile::ProfileFact;

/// One `id | role | text` line per fact.
pub fn render_facts<'a>(facts: impl IntoIterator<Item = &'a ProfileFact>) -> String {
    facts
        .into_iter()
        .map(|f| format!("{} | {} | {}", f.id, f.role_id.as_deref().unwrap_or("-"), f.text))
        .collect::<Vec<_>>()
        .join("\n")
}

// ────────────────────────────────────────────────────────────────────────────
// JD analysis
// ────────────────────────────────────────────────────────────────────────────

pub const JD_ANALYSIS_SYSTEM: &str = "You are an expert technical recruiter and ATS analyst. \
    You extract structured, prioritized requirements from job descriptions. \
    You MUST respond with valid JSON only.";

pub const JD_ANALYSIS_PROMPT: &str = r#"Analyze the job description below.

Classify every requirement into exactly one bucket and assign a priority from its POSITION
in the text, not from how important it sounds:
- P0: in the job title, the first paragraph, or a "Requirements" / "Must have" section
- P1: mentioned elsewhere in the body
- P2: in a "Preferred", "Nice to have" or "Bonus" section

Keep `original_phrase` verbatim from the JD. Keyword lists must use the JD's own spelling.
A healthy posting has 8-15 genuine P0 keywords; do not inflate P0.
Declare abbreviation pairs (full form and standard abbreviation) when the JD uses either.

Job description:
---
{jd_text}
---"#;

pub const JD_RECORD_SCHEMA: OutputSchema = OutputSchema {
    name: "jd_record",
    shape: r#"{
  "job_title": "string",
  "company": "string",
  "location": "string | null",
  "job_level": "string",
  "company_context": "string",
  "hard_skills": [{"text": "string", "category": "hard_skill", "priority": "P0|P1|P2", "original_phrase": "string"}],
  "soft_skills": [], "industry_terms": [], "experience_requirements": [],
  "education_requirements": [], "key_responsibilities": [], "achievement_language": [],
  "cultural_signals": [], "certifications": [], "tools_and_platforms": [],
  "p0_keywords": ["string"], "p1_keywords": ["string"], "p2_keywords": ["string"],
  "abbreviations": [{"full": "string", "short": "string"}]
}
category is one of: hard_skill, soft_skill, industry_term, experience, education,
responsibility, achievement_style, cultural_signal"#,
};

// ────────────────────────────────────────────────────────────────────────────
// Profile mapping
// ────────────────────────────────────────────────────────────────────────────

pub const MAPPING_SYSTEM: &str = "You map job requirements to a candidate's verified career \
    facts. You never invent facts and you never hide gaps. \
    You MUST respond with valid JSON only.";

pub const MAPPING_PROMPT: &str = r#"Classify every requirement against the candidate's facts.

- DIRECT: an exact or near-exact fact exists
- ADJACENT: a related fact exists in a different but reframable form; `reframe_strategy` must
  describe the semantic bridge
- TRANSFERABLE: the capability was shown in an unrelated context
- GAP: no supporting fact; `candidate_fact_ids` must be empty

List every fact id that could support a requirement in `candidate_fact_ids`; use only ids
from the list below. `confidence` is between 0 and 1.

Requirements (index: text):
{requirements}

Candidate facts (id | role | text):
{facts}"#;

pub const MAPPING_SCHEMA: OutputSchema = OutputSchema {
    name: "mapping_proposals",
    shape: r#"{
  "mappings": [
    {"requirement_index": 0, "match_type": "DIRECT|ADJACENT|TRANSFERABLE|GAP",
     "candidate_fact_ids": ["fact id"], "reframe_strategy": "string | null", "confidence": 0.0}
  ]
}"#,
};

// ────────────────────────────────────────────────────────────────────────────
// Reframing
// ────────────────────────────────────────────────────────────────────────────

pub const REFRAME_SYSTEM: &str = "You are an expert resume writer. You rewrite verified career \
    facts into achievement bullets in the employer's language without changing what was done. \
    You MUST respond with valid JSON only.";

pub const REFRAME_PROMPT: &str = r#"Write a tailored resume for the role below.

{grounding_instruction}

Content rules:
- Every bullet is 20-30 words and carries at least one quantified metric. If the fact has no
  number, you may add a defensible estimate, set "estimated_metric": true and say so in the log.
- Never open a bullet with: {banned_openers}
- Prefer outcome verbs: {preferred_verbs}
- Use the JD's exact phrasing for keywords where the fact supports it.
- Do not claim a technology for a role that ended before it existed.
- Bullets per role, most recent first: {role_caps}
- Every bullet you change from its fact text needs one reframing_log entry with an
  interview_note the candidate can use to defend it.
- Skills must come from the candidate's facts only.

Target role: {job_title} at {company}
P0 keywords: {p0_keywords}
P1 keywords: {p1_keywords}

Mapping (requirement -> match, fact, strategy):
{mapping}

Roles (id | title | company | dates):
{roles}

Facts (id | role | text):
{facts}
{preferences}{feedback}"#;

pub const PREFERENCES_TEMPLATE: &str = r#"
USER PREFERENCES (from your past corrections; apply when generating):
{preferences}
"#;

pub const FEEDBACK_TEMPLATE: &str = r#"
The previous draft scored {total}/100 and must improve. Weakest component: {focus}.
Component scores: {components}
Fix these rule violations:
{violations}
Keyword gaps: {keyword_gaps}"#;

pub const RESUME_DRAFT_SCHEMA: OutputSchema = OutputSchema {
    name: "resume_draft",
    shape: r#"{
  "summary": "string",
  "summary_fact_ids": ["fact id"],
  "sections": [
    {"role_id": "role id",
     "bullets": [{"text": "string", "source_fact_ids": ["fact id"], "estimated_metric": false}]}
  ],
  "skills": {"technical": ["string"], "methodologies": ["string"], "domains": ["string"]},
  "reframing_log": [
    {"original": "fact text", "reframed": "bullet text", "keywords_used": ["string"],
     "rationale": "string", "interview_note": "string", "metric_estimated": false}
  ]
}"#,
};

// ────────────────────────────────────────────────────────────────────────────
// Unit regeneration
// ────────────────────────────────────────────────────────────────────────────

pub const BULLET_REGEN_PROMPT: &str = r#"Rewrite ONE resume bullet that failed validation.

{grounding_instruction}

Problems with the current bullet:
{problems}

Current bullet: {current}
Role: {role_title} at {company} ({dates})
Facts you may cite (id | role | text):
{facts}

Rules: 20-30 words, at least one quantified metric, never open with {banned_openers},
no technology the role could not have used in those dates."#;

pub const BULLET_SCHEMA: OutputSchema = OutputSchema {
    name: "bullet",
    shape: r#"{"text": "string", "source_fact_ids": ["fact id"], "estimated_metric": false,
 "keywords_used": ["string"], "rationale": "string", "interview_note": "string"}"#,
};

pub const SUMMARY_REGEN_PROMPT: &str = r#"Rewrite the professional summary, which failed validation.

{grounding_instruction}

Problems:
{problems}

Target role: {job_title} at {company}
Facts you may cite (id | role | text):
{facts}"#;

pub const SUMMARY_SCHEMA: OutputSchema = OutputSchema {
    name: "summary",
    shape: r#"{"summary": "string", "summary_fact_ids": ["fact id"]}"#,
};

// ────────────────────────────────────────────────────────────────────────────
// Keyword patch
// ────────────────────────────────────────────────────────────────────────────

pub const KEYWORD_PATCH_PROMPT: &str = r#"Apply these keyword edits to the resume below without
changing what the candidate did.

{grounding_instruction}

Missing keywords: {missing}
Over-used keywords (reduce): {over_used}
Suggested insertions (keyword -> target): {suggestions}
Abbreviation pairs that need both forms: {abbreviations}

Keep every other rule of the original draft. Return the full resume, with a reframing_log
entry for every bullet you change.

Current resume:
{draft}

Facts (id | role | text):
{facts}"#;

pub const KEYWORD_PATCH_SCHEMA: OutputSchema = OutputSchema {
    name: "keyword_patch",
    shape: RESUME_DRAFT_SCHEMA.shape,
};

// ────────────────────────────────────────────────────────────────────────────
// Judge
// ────────────────────────────────────────────────────────────────────────────

pub const JUDGE_SYSTEM: &str = "You are a senior hiring manager reviewing a resume against a \
    job description. You score strictly and consistently. \
    You MUST respond with valid JSON only.";

pub const JUDGE_PROMPT: &str = r#"Score the resume on two axes, each 0-100:
- semantic_alignment: does the narrative match what this role actually needs?
- human_readability: does it read naturally, without keyword stuffing or filler?

Role: {job_title} at {company}
Key responsibilities: {responsibilities}

Resume:
{resume}"#;

pub const JUDGE_SCHEMA: OutputSchema = OutputSchema {
    name: "quality_judgement",
    shape: r#"{"semantic_alignment": 0, "human_readability": 0, "notes": "string"}"#,
};
