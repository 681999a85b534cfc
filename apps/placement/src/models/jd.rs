//! Structured job-description record produced by the JD Analyzer.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Requirement priority tier. Derived from where the requirement sits in the JD:
/// title / first paragraph / "Requirements" → P0, body mention → P1, "Preferred" → P2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    HardSkill,
    SoftSkill,
    IndustryTerm,
    Experience,
    Education,
    Responsibility,
    AchievementStyle,
    CulturalSignal,
}

/// A single requirement extracted from the JD. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequirement {
    pub text: String,
    pub category: RequirementCategory,
    pub priority: Priority,
    /// Verbatim phrase from the JD, kept for exact-match reuse downstream.
    pub original_phrase: String,
}

/// A declared full-form / abbreviation pair, e.g. "Customer Relationship Management" / "CRM".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abbreviation {
    pub full: String,
    pub short: String,
}

/// Health of the P0 tier. 8–15 genuine must-haves is considered healthy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum P0Health {
    #[default]
    Healthy,
    TooFew,
    OverClassified,
}

pub const P0_HEALTHY_MIN: usize = 8;
pub const P0_HEALTHY_MAX: usize = 15;

impl P0Health {
    pub fn for_count(count: usize) -> Self {
        if count < P0_HEALTHY_MIN {
            P0Health::TooFew
        } else if count > P0_HEALTHY_MAX {
            P0Health::OverClassified
        } else {
            P0Health::Healthy
        }
    }
}

/// Full structured output of JD analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JdRecord {
    pub job_title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_level: String,
    #[serde(default)]
    pub company_context: String,

    #[serde(default)]
    pub hard_skills: Vec<JobRequirement>,
    #[serde(default)]
    pub soft_skills: Vec<JobRequirement>,
    #[serde(default)]
    pub industry_terms: Vec<JobRequirement>,
    #[serde(default)]
    pub experience_requirements: Vec<JobRequirement>,
    #[serde(default)]
    pub education_requirements: Vec<JobRequirement>,
    #[serde(default)]
    pub key_responsibilities: Vec<JobRequirement>,
    #[serde(default)]
    pub achievement_language: Vec<JobRequirement>,
    #[serde(default)]
    pub cultural_signals: Vec<JobRequirement>,
    #[serde(default)]
    pub certifications: Vec<JobRequirement>,
    #[serde(default)]
    pub tools_and_platforms: Vec<JobRequirement>,

    #[serde(default)]
    pub p0_keywords: Vec<String>,
    #[serde(default)]
    pub p1_keywords: Vec<String>,
    #[serde(default)]
    pub p2_keywords: Vec<String>,
    #[serde(default)]
    pub all_keywords_flat: Vec<String>,
    #[serde(default)]
    pub abbreviations: Vec<Abbreviation>,

    /// Set by the analyzer after normalization, never trusted from model output.
    #[serde(default)]
    pub p0_health: P0Health,
}

impl JdRecord {
    /// All requirement buckets, in a stable order.
    pub fn buckets(&self) -> [&[JobRequirement]; 10] {
        [
            &self.hard_skills,
            &self.soft_skills,
            &self.industry_terms,
            &self.experience_requirements,
            &self.education_requirements,
            &self.key_responsibilities,
            &self.achievement_language,
            &self.cultural_signals,
            &self.certifications,
            &self.tools_and_platforms,
        ]
    }

    pub fn requirements(&self) -> impl Iterator<Item = &JobRequirement> {
        self.buckets().into_iter().flat_map(|b| b.iter())
    }

    pub fn keywords(&self, priority: Priority) -> &[String] {
        match priority {
            Priority::P0 => &self.p0_keywords,
            Priority::P1 => &self.p1_keywords,
            Priority::P2 => &self.p2_keywords,
        }
    }

    /// Tier a keyword belongs to (case-insensitive).
    pub fn tier_of(&self, keyword: &str) -> Option<Priority> {
        let needle = keyword.trim().to_lowercase();
        Priority::ALL.into_iter().find(|p| {
            self.keywords(*p)
                .iter()
                .any(|k| k.trim().to_lowercase() == needle)
        })
    }

    /// Deduplicates the keyword tiers and rebuilds `all_keywords_flat`.
    ///
    /// Casing of the first occurrence is preserved. A keyword listed in several tiers
    /// survives only in its highest tier, so the three lists are pairwise disjoint.
    pub fn normalize_keywords(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut tiers: [Vec<String>; 3] = Default::default();

        for (idx, priority) in Priority::ALL.into_iter().enumerate() {
            for keyword in self.keywords(priority) {
                let trimmed = keyword.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if seen.insert(trimmed.to_lowercase()) {
                    tiers[idx].push(trimmed.to_string());
                }
            }
        }

        let [p0, p1, p2] = tiers;
        self.all_keywords_flat = p0.iter().chain(&p1).chain(&p2).cloned().collect();
        self.p0_keywords = p0;
        self.p1_keywords = p1;
        self.p2_keywords = p2;

        self.abbreviations
            .retain(|a| !a.full.trim().is_empty() && !a.short.trim().is_empty());
        self.p0_health = P0Health::for_count(self.p0_keywords.len());
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn requirement(text: &str, priority: Priority) -> JobRequirement {
        JobRequirement {
            text: text.to_string(),
            category: RequirementCategory::HardSkill,
            priority,
            original_phrase: text.to_string(),
        }
    }

    /// Minimal JD record with the given keyword tiers; each P0/P1 keyword is also a
    /// hard-skill requirement.
    pub fn jd_record(p0: &[&str], p1: &[&str], p2: &[&str]) -> JdRecord {
        let mut record = JdRecord {
            job_title: "Senior Product Manager".to_string(),
            company: "Acme Corp".to_string(),
            location: Some("Remote".to_string()),
            job_level: "senior".to_string(),
            company_context: "B2B SaaS".to_string(),
            hard_skills: p0
                .iter()
                .map(|k| requirement(k, Priority::P0))
                .chain(p1.iter().map(|k| requirement(k, Priority::P1)))
                .collect(),
            soft_skills: vec![],
            industry_terms: vec![],
            experience_requirements: vec![],
            education_requirements: vec![],
            key_responsibilities: vec![],
            achievement_language: vec![],
            cultural_signals: vec![],
            certifications: vec![],
            tools_and_platforms: vec![],
            p0_keywords: p0.iter().map(|s| s.to_string()).collect(),
            p1_keywords: p1.iter().map(|s| s.to_string()).collect(),
            p2_keywords: p2.iter().map(|s| s.to_string()).collect(),
            all_keywords_flat: vec![],
            abbreviations: vec![],
            p0_health: P0Health::Healthy,
        };
        record.normalize_keywords();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::jd_record;
    use super::*;

    #[test]
    fn test_priority_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Priority::P0).unwrap(), "\"P0\"");
        let p: Priority = serde_json::from_str("\"P2\"").unwrap();
        assert_eq!(p, Priority::P2);
        assert!(serde_json::from_str::<Priority>("\"P3\"").is_err());
    }

    #[test]
    fn test_category_serde_snake_case() {
        let c: RequirementCategory = serde_json::from_str("\"achievement_style\"").unwrap();
        assert_eq!(c, RequirementCategory::AchievementStyle);
    }

    #[test]
    fn test_normalize_dedups_case_insensitively_keeping_first_spelling() {
        let jd = jd_record(&["SaaS", "saas", "CRM"], &[], &[]);
        assert_eq!(jd.p0_keywords, vec!["SaaS", "CRM"]);
    }

    #[test]
    fn test_normalize_keeps_keyword_in_highest_tier_only() {
        let jd = jd_record(&["SQL"], &["sql", "Python"], &["SQL", "MBA"]);
        assert_eq!(jd.p0_keywords, vec!["SQL"]);
        assert_eq!(jd.p1_keywords, vec!["Python"]);
        assert_eq!(jd.p2_keywords, vec!["MBA"]);
        assert_eq!(jd.all_keywords_flat, vec!["SQL", "Python", "MBA"]);
    }

    #[test]
    fn test_tiers_disjoint_and_flat_list_partitions() {
        let jd = jd_record(&["A", "B", "c"], &["C", "D", "a"], &["E", "b", "F"]);
        for kw in &jd.all_keywords_flat {
            let tiers = Priority::ALL
                .iter()
                .filter(|p| jd.keywords(**p).iter().any(|k| k.eq_ignore_ascii_case(kw)))
                .count();
            assert_eq!(tiers, 1, "{kw} must belong to exactly one tier");
        }
    }

    #[test]
    fn test_p0_health_bands() {
        assert_eq!(P0Health::for_count(3), P0Health::TooFew);
        assert_eq!(P0Health::for_count(8), P0Health::Healthy);
        assert_eq!(P0Health::for_count(15), P0Health::Healthy);
        assert_eq!(P0Health::for_count(16), P0Health::OverClassified);
    }

    #[test]
    fn test_tier_of_is_case_insensitive() {
        let jd = jd_record(&["Kubernetes"], &["Terraform"], &[]);
        assert_eq!(jd.tier_of("kubernetes"), Some(Priority::P0));
        assert_eq!(jd.tier_of("TERRAFORM"), Some(Priority::P1));
        assert_eq!(jd.tier_of("Go"), None);
    }

    #[test]
    fn test_requirements_iterates_all_buckets() {
        let jd = jd_record(&["A", "B"], &["C"], &[]);
        assert_eq!(jd.requirements().count(), 3);
    }
}
