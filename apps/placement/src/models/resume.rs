use serde::{Deserialize, Serialize};

use crate::models::profile::DateRange;

/// A single resume bullet.
///
/// Every bullet MUST carry at least one `source_fact_ids` entry resolving to a
/// `ProfileFact`; the reframer rejects bullets that do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub text: String,
    pub source_fact_ids: Vec<String>,
    /// True when the quantified metric is a defensible estimate rather than a
    /// recorded figure. Always mirrored in the reframing log.
    #[serde(default)]
    pub estimated_metric: bool,
}

/// One role in the work-experience section. Title, company and dates are copied from
/// the knowledge base, never taken from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSection {
    pub role_id: String,
    pub title: String,
    pub company: String,
    pub dates: DateRange,
    pub bullets: Vec<Bullet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillsBlock {
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub methodologies: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl SkillsBlock {
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.technical
            .iter()
            .chain(&self.methodologies)
            .chain(&self.domains)
    }

    pub fn is_empty(&self) -> bool {
        self.technical.is_empty() && self.methodologies.is_empty() && self.domains.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    SingleColumn,
    TwoColumn,
    Sidebar,
}

/// Rendering-relevant settings evaluated by the Format Compliance Checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    pub layout: Layout,
    pub font_family: String,
    pub body_font_pt: f32,
    pub header_font_pt: f32,
    pub section_headers: Vec<String>,
    pub filename: String,
    #[serde(default)]
    pub uses_tables_or_graphics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeDraft {
    pub summary: String,
    #[serde(default)]
    pub summary_fact_ids: Vec<String>,
    /// Reverse-chronological role sections.
    pub sections: Vec<RoleSection>,
    pub skills: SkillsBlock,
    pub presentation: Presentation,
}

/// Position of a bullet inside a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BulletRef {
    pub section: usize,
    pub bullet: usize,
}

impl ResumeDraft {
    pub fn bullets(&self) -> impl Iterator<Item = (BulletRef, &RoleSection, &Bullet)> {
        self.sections.iter().enumerate().flat_map(|(s, section)| {
            section.bullets.iter().enumerate().map(move |(b, bullet)| {
                (
                    BulletRef {
                        section: s,
                        bullet: b,
                    },
                    section,
                    bullet,
                )
            })
        })
    }

    pub fn total_bullets(&self) -> usize {
        self.sections.iter().map(|s| s.bullets.len()).sum()
    }

    pub fn bullet(&self, at: BulletRef) -> Option<&Bullet> {
        self.sections.get(at.section)?.bullets.get(at.bullet)
    }

    pub fn bullet_mut(&mut self, at: BulletRef) -> Option<&mut Bullet> {
        self.sections.get_mut(at.section)?.bullets.get_mut(at.bullet)
    }
}

/// Transparency record for one rewritten bullet. Accumulates across iterations and is
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReframingLogEntry {
    pub original: String,
    pub reframed: String,
    #[serde(default)]
    pub keywords_used: Vec<String>,
    pub rationale: String,
    pub interview_note: String,
    #[serde(default)]
    pub metric_estimated: bool,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_bullets_iterates_in_section_order_with_refs() {
        let d = draft(
            "summary",
            vec![
                section("r1", (2022, 1), None, vec![bullet("a", &["f1"]), bullet("b", &["f2"])]),
                section("r2", (2019, 1), Some((2021, 12)), vec![bullet("c", &["f3"])]),
            ],
            &[],
        );
        let refs: Vec<_> = d.bullets().map(|(r, _, b)| (r, b.text.clone())).collect();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[2].0, BulletRef { section: 1, bullet: 0 });
        assert_eq!(refs[2].1, "c");
        assert_eq!(d.total_bullets(), 3);
    }

    #[test]
    fn test_bullet_lookup_out_of_range_is_none() {
        let d = draft("s", vec![], &[]);
        assert!(d.bullet(BulletRef { section: 0, bullet: 0 }).is_none());
    }

    #[test]
    fn test_bullet_requires_source_fact_ids_in_json() {
        let bad = r#"{"text": "Shipped onboarding flow lifting activation 18%"}"#;
        assert!(serde_json::from_str::<Bullet>(bad).is_err());
    }
}
