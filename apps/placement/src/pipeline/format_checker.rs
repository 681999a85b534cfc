//! Format Compliance Checker: a fixed, enumerable ATS rule set evaluated without any
//! model call. Pure: the same draft always yields the same report.

use std::cmp::Reverse;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::models::jd::JdRecord;
use crate::models::profile::Candidate;
use crate::models::resume::{Layout, Presentation, ReframingLogEntry, ResumeDraft};
use crate::pipeline::rules::{Location, RuleClass, RuleViolation};

pub const HEADER_SUMMARY: &str = "PROFESSIONAL SUMMARY";
pub const HEADER_EXPERIENCE: &str = "WORK EXPERIENCE";
pub const HEADER_SKILLS: &str = "SKILLS";
pub const HEADER_EDUCATION: &str = "EDUCATION";
pub const HEADER_CERTIFICATIONS: &str = "CERTIFICATIONS";

/// Section headers ATS parsers recognise. Anything else fails `standard_headers`.
pub const STANDARD_HEADERS: &[&str] = &[
    HEADER_SUMMARY,
    HEADER_EXPERIENCE,
    HEADER_SKILLS,
    HEADER_EDUCATION,
    HEADER_CERTIFICATIONS,
];
const REQUIRED_HEADERS: &[&str] = &[HEADER_SUMMARY, HEADER_EXPERIENCE, HEADER_SKILLS];

pub const ATS_SAFE_FONTS: &[&str] = &[
    "Arial",
    "Calibri",
    "Helvetica",
    "Garamond",
    "Georgia",
    "Cambria",
    "Times New Roman",
];
pub const DEFAULT_FONT: &str = "Arial";

pub const BODY_FONT_PT: (f32, f32) = (10.0, 12.0);
pub const HEADER_FONT_PT: (f32, f32) = (12.0, 16.0);
pub const BULLETS_PER_ROLE: (usize, usize) = (1, 5);
pub const MAX_PAGES: usize = 2;

/// Glyphs that betray tables, text boxes or decorative graphics.
const GRAPHIC_GLYPHS: &[char] = &['|', '\t', '│', '┃', '■', '□', '★', '☆', '●', '▪', '►', '✓', '✔'];

// ────────────────────────────────────────────────────────────────────────────
// Page-length model
// ────────────────────────────────────────────────────────────────────────────

/// US letter, 1" margins, Arial-like average glyph width.
const TEXT_WIDTH_IN: f32 = 6.5;
const TEXT_HEIGHT_IN: f32 = 9.0;
const POINTS_PER_INCH: f32 = 72.27;
const AVG_CHAR_EM: f32 = 0.5;
const SPACE_EM: f32 = 0.28;
const LINE_LEADING: f32 = 1.2;
/// Name and contact block.
const HEADER_BLOCK_LINES: usize = 3;

/// Greedy word wrap of `text` at `width_em`, every glyph counted at the average width.
fn wrapped_lines(text: &str, width_em: f32) -> usize {
    let mut lines = 0;
    let mut current = 0.0_f32;
    for word in text.split_whitespace() {
        let word_w = word.chars().count() as f32 * AVG_CHAR_EM;
        if lines == 0 {
            lines = 1;
            current = word_w;
        } else if current + SPACE_EM + word_w > width_em {
            lines += 1;
            current = word_w;
        } else {
            current += SPACE_EM + word_w;
        }
    }
    lines
}

/// Estimated rendered page count.
pub fn estimate_pages(draft: &ResumeDraft) -> usize {
    let body_pt = draft.presentation.body_font_pt.max(1.0);
    let width_em = TEXT_WIDTH_IN * POINTS_PER_INCH / body_pt;
    let lines_per_page = ((TEXT_HEIGHT_IN * POINTS_PER_INCH) / (body_pt * LINE_LEADING)).floor() as usize;

    let mut lines = HEADER_BLOCK_LINES;
    // Each header takes its own line plus spacing.
    lines += draft.presentation.section_headers.len() * 2;
    lines += wrapped_lines(&draft.summary, width_em);
    for section in &draft.sections {
        lines += 1;
        lines += section
            .bullets
            .iter()
            .map(|b| wrapped_lines(&format!("• {}", b.text), width_em))
            .sum::<usize>();
    }
    for group in [&draft.skills.technical, &draft.skills.methodologies, &draft.skills.domains] {
        if !group.is_empty() {
            lines += wrapped_lines(&group.join(", "), width_em);
        }
    }

    lines.div_ceil(lines_per_page.max(1))
}

// ────────────────────────────────────────────────────────────────────────────
// Rule set
// ────────────────────────────────────────────────────────────────────────────

pub struct FormatRule {
    pub id: &'static str,
    pub description: &'static str,
    check: fn(&ResumeDraft) -> Vec<String>,
}

pub const FORMAT_RULES: &[FormatRule] = &[
    FormatRule {
        id: "single_column",
        description: "single-column layout, no sidebars",
        check: check_single_column,
    },
    FormatRule {
        id: "no_graphics",
        description: "no graphics, tables or text boxes",
        check: check_no_graphics,
    },
    FormatRule {
        id: "standard_headers",
        description: "section headers from the standard set",
        check: check_standard_headers,
    },
    FormatRule {
        id: "ats_font",
        description: "ATS-safe font family",
        check: check_font_family,
    },
    FormatRule {
        id: "body_font_size",
        description: "body text 10-12pt",
        check: check_body_size,
    },
    FormatRule {
        id: "header_font_size",
        description: "headers 12-16pt",
        check: check_header_size,
    },
    FormatRule {
        id: "bullets_per_role",
        description: "1-5 bullets per role",
        check: check_bullets_per_role,
    },
    FormatRule {
        id: "page_length",
        description: "at most two pages",
        check: check_page_length,
    },
    FormatRule {
        id: "filename",
        description: "filename First_Last_Resume_Company.pdf",
        check: check_filename,
    },
    FormatRule {
        id: "dates",
        description: "MMM YYYY dates in reverse-chronological order",
        check: check_dates,
    },
    FormatRule {
        id: "summary_present",
        description: "professional summary present",
        check: check_summary,
    },
];

fn check_single_column(d: &ResumeDraft) -> Vec<String> {
    match d.presentation.layout {
        Layout::SingleColumn => vec![],
        other => vec![format!("layout is {other:?}, expected single column")],
    }
}

fn check_no_graphics(d: &ResumeDraft) -> Vec<String> {
    let mut out = Vec::new();
    if d.presentation.uses_tables_or_graphics {
        out.push("presentation uses tables or graphics".to_string());
    }
    let texts = std::iter::once(d.summary.as_str())
        .chain(d.bullets().map(|(_, _, b)| b.text.as_str()))
        .chain(d.skills.iter().map(String::as_str));
    for text in texts {
        if let Some(glyph) = text.chars().find(|c| GRAPHIC_GLYPHS.contains(c)) {
            out.push(format!("text contains layout glyph {glyph:?}"));
            break;
        }
    }
    out
}

fn check_standard_headers(d: &ResumeDraft) -> Vec<String> {
    let headers = &d.presentation.section_headers;
    let mut out: Vec<String> = headers
        .iter()
        .filter(|h| !STANDARD_HEADERS.contains(&h.as_str()))
        .map(|h| format!("non-standard section header '{h}'"))
        .collect();
    for required in REQUIRED_HEADERS {
        if !headers.iter().any(|h| h == required) {
            out.push(format!("missing section header '{required}'"));
        }
    }
    out
}

fn check_font_family(d: &ResumeDraft) -> Vec<String> {
    let font = d.presentation.font_family.trim();
    if ATS_SAFE_FONTS.iter().any(|f| f.eq_ignore_ascii_case(font)) {
        vec![]
    } else {
        vec![format!("font '{font}' is not ATS-safe")]
    }
}

fn check_body_size(d: &ResumeDraft) -> Vec<String> {
    let pt = d.presentation.body_font_pt;
    if (BODY_FONT_PT.0..=BODY_FONT_PT.1).contains(&pt) {
        vec![]
    } else {
        vec![format!("body font {pt}pt outside {}-{}pt", BODY_FONT_PT.0, BODY_FONT_PT.1)]
    }
}

fn check_header_size(d: &ResumeDraft) -> Vec<String> {
    let pt = d.presentation.header_font_pt;
    if (HEADER_FONT_PT.0..=HEADER_FONT_PT.1).contains(&pt) {
        vec![]
    } else {
        vec![format!("header font {pt}pt outside {}-{}pt", HEADER_FONT_PT.0, HEADER_FONT_PT.1)]
    }
}

fn check_bullets_per_role(d: &ResumeDraft) -> Vec<String> {
    d.sections
        .iter()
        .filter(|s| !(BULLETS_PER_ROLE.0..=BULLETS_PER_ROLE.1).contains(&s.bullets.len()))
        .map(|s| format!("'{}' has {} bullets", s.title, s.bullets.len()))
        .collect()
}

fn check_page_length(d: &ResumeDraft) -> Vec<String> {
    let pages = estimate_pages(d);
    if pages <= MAX_PAGES {
        vec![]
    } else {
        vec![format!("estimated {pages} pages, max {MAX_PAGES}")]
    }
}

fn filename_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Z][A-Za-z]+_[A-Z][A-Za-z]+_Resume_[A-Za-z0-9]+\.pdf$").ok())
        .as_ref()
}

fn check_filename(d: &ResumeDraft) -> Vec<String> {
    let name = &d.presentation.filename;
    match filename_pattern() {
        Some(re) if re.is_match(name) => vec![],
        _ => vec![format!("filename '{name}' does not match First_Last_Resume_Company.pdf")],
    }
}

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Z][a-z]{2} \d{4} - ([A-Z][a-z]{2} \d{4}|Present)$").ok())
        .as_ref()
}

fn check_dates(d: &ResumeDraft) -> Vec<String> {
    let mut out = Vec::new();
    for s in &d.sections {
        let shown = s.dates.display();
        if !date_pattern().is_some_and(|re| re.is_match(&shown)) {
            out.push(format!("'{}' dates '{shown}' are not MMM YYYY", s.title));
        }
    }
    let ordered = d
        .sections
        .windows(2)
        .all(|w| w[0].dates.recency_key() >= w[1].dates.recency_key());
    if !ordered {
        out.push("roles are not in reverse-chronological order".to_string());
    }
    out
}

fn check_summary(d: &ResumeDraft) -> Vec<String> {
    if d.summary.trim().is_empty() {
        vec!["professional summary is empty".to_string()]
    } else {
        vec![]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Report
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatReport {
    pub rules_passed: usize,
    pub rules_total: usize,
    pub violations: Vec<RuleViolation>,
}

impl FormatReport {
    pub fn compliance_pct(&self) -> f64 {
        if self.rules_total == 0 {
            return 100.0;
        }
        self.rules_passed as f64 / self.rules_total as f64 * 100.0
    }
}

pub fn check_format(draft: &ResumeDraft) -> FormatReport {
    let mut violations = Vec::new();
    let mut rules_passed = 0;
    for rule in FORMAT_RULES {
        let failures = (rule.check)(draft);
        if failures.is_empty() {
            rules_passed += 1;
        }
        violations.extend(failures.into_iter().map(|message| {
            RuleViolation::new(rule.id, RuleClass::Format, Location::Presentation, message)
        }));
    }
    debug!("Format check: {rules_passed}/{} rules passed", FORMAT_RULES.len());
    FormatReport {
        rules_passed,
        rules_total: FORMAT_RULES.len(),
        violations,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Presentation defaults and repair
// ────────────────────────────────────────────────────────────────────────────

/// Letters only, capitalised: "o'neil" → "Oneil".
fn name_token(raw: &str) -> String {
    let letters: String = raw.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let mut chars = letters.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// `First_Last_Resume_Company.pdf`, falling back to placeholders for missing parts.
pub fn standard_filename(candidate: &Candidate, company: &str) -> String {
    let parts: Vec<String> = candidate
        .name
        .split_whitespace()
        .map(name_token)
        .filter(|p| p.len() >= 2)
        .collect();
    let first = parts.first().cloned().unwrap_or_else(|| "Candidate".to_string());
    let last = if parts.len() >= 2 {
        parts[parts.len() - 1].clone()
    } else {
        "Resume".to_string()
    };
    let company: String = company.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let company = if company.is_empty() {
        "Company".to_string()
    } else {
        company
    };
    format!("{first}_{last}_Resume_{company}.pdf")
}

pub fn standard_presentation(candidate: &Candidate, jd: &JdRecord, with_education: bool, with_certifications: bool) -> Presentation {
    let mut section_headers = vec![
        HEADER_SUMMARY.to_string(),
        HEADER_EXPERIENCE.to_string(),
        HEADER_SKILLS.to_string(),
    ];
    if with_education {
        section_headers.push(HEADER_EDUCATION.to_string());
    }
    if with_certifications {
        section_headers.push(HEADER_CERTIFICATIONS.to_string());
    }
    Presentation {
        layout: Layout::SingleColumn,
        font_family: DEFAULT_FONT.to_string(),
        body_font_pt: 11.0,
        header_font_pt: 14.0,
        section_headers,
        filename: standard_filename(candidate, &jd.company),
        uses_tables_or_graphics: false,
    }
}

/// A repaired draft plus a log entry for every bullet whose wording changed.
#[derive(Debug, Clone)]
pub struct PresentationRepair {
    pub draft: ResumeDraft,
    pub log: Vec<ReframingLogEntry>,
}

fn strip_glyphs(s: &str) -> String {
    s.chars()
        .map(|c| if GRAPHIC_GLYPHS.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic fixes for every presentation-level rule: restores standard settings,
/// orders roles, caps bullets and trims the oldest bullets until the page estimate fits.
pub fn repair_presentation(draft: &ResumeDraft, standard: &Presentation) -> PresentationRepair {
    let mut fixed = draft.clone();
    let mut log = Vec::new();
    let report = check_format(draft);
    let failed = |id: &str| report.violations.iter().any(|v| v.rule == id);

    if failed("single_column") {
        fixed.presentation.layout = standard.layout;
    }
    if failed("no_graphics") {
        fixed.presentation.uses_tables_or_graphics = false;
        fixed.summary = strip_glyphs(&fixed.summary);
        for section in &mut fixed.sections {
            for bullet in &mut section.bullets {
                let stripped = strip_glyphs(&bullet.text);
                if stripped == bullet.text {
                    continue;
                }
                log.push(ReframingLogEntry {
                    original: bullet.text.clone(),
                    reframed: stripped.clone(),
                    keywords_used: vec![],
                    rationale: "removed table and graphic glyphs that ATS parsers misread".to_string(),
                    interview_note: "Same claim as before; only layout characters were removed.".to_string(),
                    metric_estimated: bullet.estimated_metric,
                });
                bullet.text = stripped;
            }
        }
    }
    if failed("standard_headers") {
        fixed.presentation.section_headers = standard.section_headers.clone();
    }
    if failed("ats_font") {
        fixed.presentation.font_family = standard.font_family.clone();
    }
    if failed("body_font_size") {
        fixed.presentation.body_font_pt = standard.body_font_pt;
    }
    if failed("header_font_size") {
        fixed.presentation.header_font_pt = standard.header_font_pt;
    }
    if failed("filename") {
        fixed.presentation.filename = standard.filename.clone();
    }
    if failed("dates") {
        fixed.sections.sort_by_key(|s| Reverse(s.dates.recency_key()));
    }
    for section in &mut fixed.sections {
        section.bullets.truncate(BULLETS_PER_ROLE.1);
    }
    // Oldest roles give up bullets first, never below one.
    while estimate_pages(&fixed) > MAX_PAGES {
        let Some(section) = fixed.sections.iter_mut().rev().find(|s| s.bullets.len() > 1) else {
            break;
        };
        section.bullets.pop();
    }
    debug!("Presentation repair rewrote {} bullets", log.len());
    PresentationRepair { draft: fixed, log }
}
