//! Profile Mapper: classifies every JD requirement against the knowledge base.
//!
//! The model proposes match types and candidate facts; everything else is decided here.
//! Proposals are validated against the KB, omitted requirements become GAPs, and the
//! supporting fact is picked by a deterministic tie-break.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{info, warn};

use crate::knowledge::{check_integrity, KnowledgeBase};
use crate::llm_client::extractor::extract_with;
use crate::llm_client::{ModelCapability, ModelRequest};
use crate::models::jd::{JdRecord, JobRequirement, Priority};
use crate::models::mapping::{CoverageSummary, MappingEntry, MappingMatrix, MatchType};
use crate::pipeline::prompts::{render_facts, MAPPING_PROMPT, MAPPING_SCHEMA, MAPPING_SYSTEM};
use crate::pipeline::{PipelineError, Stage};

#[derive(Debug, Clone, Deserialize)]
struct MappingProposals {
    mappings: Vec<MappingProposal>,
}

#[derive(Debug, Clone, Deserialize)]
struct MappingProposal {
    requirement_index: usize,
    match_type: MatchType,
    #[serde(default)]
    candidate_fact_ids: Vec<String>,
    #[serde(default)]
    reframe_strategy: Option<String>,
    confidence: f64,
}

fn validate_proposals(
    proposals: &MappingProposals,
    requirement_count: usize,
    kb: &dyn KnowledgeBase,
) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for p in &proposals.mappings {
        let i = p.requirement_index;
        if i >= requirement_count {
            issues.push(format!("requirement_index {i} is out of range"));
            continue;
        }
        if !seen.insert(i) {
            issues.push(format!("requirement {i} is mapped more than once"));
        }
        for id in &p.candidate_fact_ids {
            if kb.fact(id).is_none() {
                issues.push(format!("requirement {i} cites unknown fact id '{id}'"));
            }
        }
        match p.match_type {
            MatchType::Gap if !p.candidate_fact_ids.is_empty() => {
                issues.push(format!("requirement {i} is GAP but cites facts"));
            }
            MatchType::Direct | MatchType::Adjacent | MatchType::Transferable
                if p.candidate_fact_ids.is_empty() =>
            {
                issues.push(format!("requirement {i} is not GAP but cites no fact"));
            }
            _ => {}
        }
        if p.match_type == MatchType::Adjacent
            && p.reframe_strategy.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            issues.push(format!("requirement {i} is ADJACENT without a reframe_strategy"));
        }
        if !(0.0..=1.0).contains(&p.confidence) {
            issues.push(format!(
                "requirement {i} has confidence {} outside [0, 1]",
                p.confidence
            ));
        }
    }
    issues
}

/// Picks the supporting fact: most recent role first, then most specific metrics,
/// then lowest id. Facts without a role rank after every role-bound fact.
fn pick_fact(candidates: &[String], kb: &dyn KnowledgeBase) -> Option<String> {
    candidates
        .iter()
        .filter_map(|id| kb.fact(id))
        .min_by_key(|fact| {
            let recency = fact
                .role_id
                .as_deref()
                .and_then(|r| kb.recency_rank(r))
                .unwrap_or(usize::MAX);
            (recency, std::cmp::Reverse(fact.metric_specificity()), fact.id.clone())
        })
        .map(|fact| fact.id.clone())
}

pub fn coverage_summary(entries: &[MappingEntry]) -> CoverageSummary {
    let mut summary = CoverageSummary::default();
    for entry in entries {
        match entry.match_type {
            MatchType::Direct => summary.direct_count += 1,
            MatchType::Adjacent => summary.adjacent_count += 1,
            MatchType::Transferable => summary.transferable_count += 1,
            MatchType::Gap => {
                summary.gap_count += 1;
                summary.gaps.push(entry.requirement.text.clone());
            }
        }
        if entry.requirement.priority == Priority::P0 {
            summary.p0_total += 1;
            if entry.match_type != MatchType::Gap {
                summary.p0_covered += 1;
            }
        }
    }
    summary.p0_coverage_pct = if summary.p0_total == 0 {
        100.0
    } else {
        let pct = summary.p0_covered as f64 / summary.p0_total as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    };
    summary
}

fn render_requirements(requirements: &[&JobRequirement]) -> String {
    requirements
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{i}: [{}] {}", r.priority, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn map_profile(
    model: &dyn ModelCapability,
    jd: &JdRecord,
    kb: &dyn KnowledgeBase,
) -> Result<MappingMatrix, PipelineError> {
    check_integrity(kb).map_err(|e| PipelineError::Mapping(e.to_string()))?;

    let requirements: Vec<&JobRequirement> = jd.requirements().collect();
    if requirements.is_empty() {
        return Err(PipelineError::Mapping(
            "JD record has no requirements to map".to_string(),
        ));
    }

    let request = ModelRequest::new(
        MAPPING_SYSTEM,
        MAPPING_PROMPT
            .replace("{requirements}", &render_requirements(&requirements))
            .replace("{facts}", &render_facts(kb.facts())),
        MAPPING_SCHEMA,
    );
    let proposals: MappingProposals = extract_with(model, &request, |p: &MappingProposals| {
        validate_proposals(p, requirements.len(), kb)
    })
    .await
    .map_err(|e| PipelineError::from_extract(Stage::Mapping, e))?;

    let by_index: HashMap<usize, MappingProposal> = proposals
        .mappings
        .into_iter()
        .map(|p| (p.requirement_index, p))
        .collect();

    let entries: Vec<MappingEntry> = requirements
        .iter()
        .enumerate()
        .map(|(i, req)| match by_index.get(&i) {
            Some(p) => {
                let source_fact = match p.match_type {
                    MatchType::Gap => None,
                    _ => pick_fact(&p.candidate_fact_ids, kb),
                };
                MappingEntry {
                    requirement: (*req).clone(),
                    match_type: p.match_type,
                    source_fact,
                    reframe_strategy: p.reframe_strategy.clone(),
                    confidence: p.confidence,
                }
            }
            None => {
                warn!("Requirement '{}' was not mapped, recording as GAP", req.text);
                MappingEntry {
                    requirement: (*req).clone(),
                    match_type: MatchType::Gap,
                    source_fact: None,
                    reframe_strategy: None,
                    confidence: 0.0,
                }
            }
        })
        .collect();

    let coverage_summary = coverage_summary(&entries);
    info!(
        "Mapped {} requirements: P0 coverage {}/{} ({}%), {} gaps",
        entries.len(),
        coverage_summary.p0_covered,
        coverage_summary.p0_total,
        coverage_summary.p0_coverage_pct,
        coverage_summary.gap_count
    );

    Ok(MappingMatrix {
        entries,
        coverage_summary,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::mapping_reply;
    use super::*;
    use crate::knowledge::fixtures::knowledge_base;
    use crate::llm_client::testing::ScriptedModel;
    use crate::models::jd::fixtures::jd_record;
    use crate::models::profile::{Candidate, ProfileFact, ProfileRole};
    use serde_json::json;

    #[tokio::test]
    async fn test_eleven_p0_nine_direct_two_gaps() {
        let p0 = [
            "SQL", "A/B testing", "Amplitude", "roadmap", "pricing", "onboarding", "churn",
            "CRM", "triage", "Kubernetes", "Go",
        ];
        let jd = jd_record(&p0, &[], &[]);
        let kb = knowledge_base();
        let direct: Vec<(usize, &str)> = (0..9).map(|i| (i, "f1")).collect();
        let model = ScriptedModel::new().reply(MAPPING_SCHEMA.name, mapping_reply(11, &direct));

        let matrix = map_profile(&model, &jd, &kb).await.unwrap();
        let s = &matrix.coverage_summary;
        assert_eq!(s.p0_covered, 9);
        assert_eq!(s.p0_total, 11);
        assert!((s.p0_coverage_pct - 81.8).abs() < 1e-9);
        assert_eq!(s.gaps, vec!["Kubernetes", "Go"]);
        assert_eq!(s.direct_count, 9);
    }

    #[tokio::test]
    async fn test_gap_has_no_source_and_others_resolve() {
        let jd = jd_record(&["SQL", "Kubernetes"], &[], &[]);
        let kb = knowledge_base();
        let model = ScriptedModel::new().reply(MAPPING_SCHEMA.name, mapping_reply(2, &[(0, "f3")]));
        let matrix = map_profile(&model, &jd, &kb).await.unwrap();
        for entry in &matrix.entries {
            match entry.match_type {
                MatchType::Gap => assert!(entry.source_fact.is_none()),
                _ => assert!(kb.fact(entry.source_fact.as_deref().unwrap()).is_some()),
            }
        }
    }

    #[tokio::test]
    async fn test_tie_break_prefers_recent_role_then_metrics() {
        let jd = jd_record(&["SQL"], &[], &[]);
        let kb = knowledge_base();
        // f3 is from the older role; f5 has no role; f1 and f2 are both current.
        let reply = json!({"mappings": [{
            "requirement_index": 0,
            "match_type": "DIRECT",
            "candidate_fact_ids": ["f5", "f3", "f2", "f1"],
            "confidence": 0.8
        }]});
        let model = ScriptedModel::new().reply(MAPPING_SCHEMA.name, reply);
        let matrix = map_profile(&model, &jd, &kb).await.unwrap();
        // f1 carries two numeric tokens (18%, 4,000), f2 one (35%).
        assert_eq!(matrix.entries[0].source_fact.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn test_omitted_requirement_surfaces_as_gap() {
        let jd = jd_record(&["SQL", "Go"], &[], &[]);
        let kb = knowledge_base();
        let reply = json!({"mappings": [{
            "requirement_index": 0, "match_type": "DIRECT",
            "candidate_fact_ids": ["f5"], "confidence": 1.0
        }]});
        let model = ScriptedModel::new().reply(MAPPING_SCHEMA.name, reply);
        let matrix = map_profile(&model, &jd, &kb).await.unwrap();
        assert_eq!(matrix.entries[1].match_type, MatchType::Gap);
        assert_eq!(matrix.entries[1].confidence, 0.0);
        assert_eq!(matrix.coverage_summary.gaps, vec!["Go"]);
    }

    #[tokio::test]
    async fn test_unknown_fact_triggers_repair() {
        let jd = jd_record(&["SQL"], &[], &[]);
        let kb = knowledge_base();
        let model = ScriptedModel::new()
            .reply(MAPPING_SCHEMA.name, mapping_reply(1, &[(0, "f99")]))
            .reply(MAPPING_SCHEMA.name, mapping_reply(1, &[(0, "f5")]));
        let matrix = map_profile(&model, &jd, &kb).await.unwrap();
        assert_eq!(matrix.entries[0].source_fact.as_deref(), Some("f5"));
        assert!(model.calls()[1].prompt.contains("unknown fact id 'f99'"));
    }

    #[tokio::test]
    async fn test_adjacent_without_strategy_fails_after_repair() {
        let jd = jd_record(&["SQL"], &[], &[]);
        let kb = knowledge_base();
        let reply = json!({"mappings": [{
            "requirement_index": 0, "match_type": "ADJACENT",
            "candidate_fact_ids": ["f3"], "confidence": 0.5
        }]});
        let model = ScriptedModel::new().reply(MAPPING_SCHEMA.name, reply);
        let err = map_profile(&model, &jd, &kb).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction { stage: Stage::Mapping, .. }));
    }

    struct EmptyKb(Candidate);

    impl KnowledgeBase for EmptyKb {
        fn version(&self) -> &str {
            "v0"
        }
        fn candidate(&self) -> &Candidate {
            &self.0
        }
        fn roles(&self) -> &[ProfileRole] {
            &[]
        }
        fn facts(&self) -> &[ProfileFact] {
            &[]
        }
        fn education(&self) -> &[String] {
            &[]
        }
        fn certifications(&self) -> &[String] {
            &[]
        }
    }

    #[tokio::test]
    async fn test_empty_kb_is_mapping_error() {
        let jd = jd_record(&["SQL"], &[], &[]);
        let model = ScriptedModel::new();
        let err = map_profile(&model, &jd, &EmptyKb(Candidate::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mapping(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_coverage_with_no_p0_is_full() {
        assert_eq!(coverage_summary(&[]).p0_coverage_pct, 100.0);
    }
}
