use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::jd::JobRequirement;

/// How a JD requirement is supported by the candidate's knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    /// Exact or near-exact skill/fact match.
    Direct,
    /// Related fact in a different but reframable form.
    Adjacent,
    /// Capability demonstrated in an unrelated context.
    Transferable,
    /// No supporting fact.
    Gap,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Direct => "DIRECT",
            MatchType::Adjacent => "ADJACENT",
            MatchType::Transferable => "TRANSFERABLE",
            MatchType::Gap => "GAP",
        };
        f.write_str(s)
    }
}

/// One requirement classified against the knowledge base. Read-only after mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub requirement: JobRequirement,
    pub match_type: MatchType,
    /// Id of the backing `ProfileFact`. Present iff `match_type != Gap`.
    pub source_fact: Option<String>,
    pub reframe_strategy: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub p0_covered: usize,
    pub p0_total: usize,
    pub p0_coverage_pct: f64,
    pub direct_count: usize,
    pub adjacent_count: usize,
    pub transferable_count: usize,
    pub gap_count: usize,
    /// Requirement texts with no supporting fact.
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingMatrix {
    pub entries: Vec<MappingEntry>,
    pub coverage_summary: CoverageSummary,
}
