//! JD Analyzer: raw job-description text → prioritized requirement/keyword record.

use tracing::{info, warn};

use crate::llm_client::extractor::{extract, SchemaCheck};
use crate::llm_client::{ModelCapability, ModelRequest};
use crate::models::jd::{JdRecord, P0Health, P0_HEALTHY_MAX, P0_HEALTHY_MIN};
use crate::pipeline::prompts::{JD_ANALYSIS_PROMPT, JD_ANALYSIS_SYSTEM, JD_RECORD_SCHEMA};
use crate::pipeline::{PipelineError, Stage};

impl SchemaCheck for JdRecord {
    fn schema_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.job_title.trim().is_empty() {
            issues.push("job_title is empty".to_string());
        }
        if self.requirements().next().is_none() {
            issues.push("no requirements were extracted into any bucket".to_string());
        }
        if self.p0_keywords.iter().all(|k| k.trim().is_empty()) {
            issues.push("p0_keywords is empty".to_string());
        }
        for (i, req) in self.requirements().enumerate() {
            if req.text.trim().is_empty() {
                issues.push(format!("requirement {i} has empty text"));
            }
        }
        issues
    }
}

pub async fn analyze_jd(model: &dyn ModelCapability, jd_text: &str) -> Result<JdRecord, PipelineError> {
    let jd_text = jd_text.trim();
    if jd_text.is_empty() {
        return Err(PipelineError::InvalidInput(
            "job description text is empty".to_string(),
        ));
    }

    let request = ModelRequest::new(
        JD_ANALYSIS_SYSTEM,
        JD_ANALYSIS_PROMPT.replace("{jd_text}", jd_text),
        JD_RECORD_SCHEMA,
    );
    let mut record: JdRecord = extract(model, &request)
        .await
        .map_err(|e| PipelineError::from_extract(Stage::JdAnalysis, e))?;

    record.normalize_keywords();

    match record.p0_health {
        P0Health::Healthy => {}
        P0Health::TooFew => warn!(
            "JD yielded only {} P0 keywords (healthy: {P0_HEALTHY_MIN}-{P0_HEALTHY_MAX})",
            record.p0_keywords.len()
        ),
        P0Health::OverClassified => warn!(
            "JD yielded {} P0 keywords (healthy: {P0_HEALTHY_MIN}-{P0_HEALTHY_MAX}); extraction likely over-classified",
            record.p0_keywords.len()
        ),
    }

    info!(
        "JD analyzed: '{}' at {} ({} P0 / {} P1 / {} P2 keywords)",
        record.job_title,
        record.company,
        record.p0_keywords.len(),
        record.p1_keywords.len(),
        record.p2_keywords.len()
    );
    Ok(record)
}


#[cfg(test)]
mod tests {
    use super::fixtures::jd_reply;
    use super::*;
    use crate::llm_client::testing::ScriptedModel;
    use serde_json::json;

    const JD: &str = "Senior Product Manager at Acme Corp. Requirements: SQL, A/B testing.";

    #[tokio::test]
    async fn test_empty_jd_rejected_without_model_call() {
        let model = ScriptedModel::new();
        let err = analyze_jd(&model, "   \n").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_record_is_normalized() {
        let model = ScriptedModel::new().reply(
            JD_RECORD_SCHEMA.name,
            jd_reply(&["SQL", "sql", "A/B testing"], &["SQL", "Amplitude"]),
        );
        let record = analyze_jd(&model, JD).await.unwrap();
        assert_eq!(record.p0_keywords, vec!["SQL", "A/B testing"]);
        assert_eq!(record.p1_keywords, vec!["Amplitude"]);
        assert_eq!(record.all_keywords_flat.len(), 3);
        assert_eq!(record.p0_health, P0Health::TooFew);
        assert!(model.calls()[0].prompt.contains("Requirements: SQL"));
    }

    #[tokio::test]
    async fn test_over_classified_p0_is_flagged_not_rejected() {
        let p0: Vec<String> = (0..20).map(|i| format!("skill{i}")).collect();
        let p0: Vec<&str> = p0.iter().map(String::as_str).collect();
        let model = ScriptedModel::new().reply(JD_RECORD_SCHEMA.name, jd_reply(&p0, &[]));
        let record = analyze_jd(&model, JD).await.unwrap();
        assert_eq!(record.p0_health, P0Health::OverClassified);
    }

    #[tokio::test]
    async fn test_invalid_priority_repaired_once() {
        let mut bad = jd_reply(&["SQL"], &[]);
        bad["hard_skills"][0]["priority"] = json!("P7");
        let model = ScriptedModel::new()
            .reply(JD_RECORD_SCHEMA.name, bad)
            .reply(JD_RECORD_SCHEMA.name, jd_reply(&["SQL"], &[]));
        let record = analyze_jd(&model, JD).await.unwrap();
        assert_eq!(record.p0_keywords, vec!["SQL"]);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_persistently_invalid_output_is_extraction_error() {
        let mut bad = jd_reply(&["SQL"], &[]);
        bad["job_title"] = json!("");
        let model = ScriptedModel::new().reply(JD_RECORD_SCHEMA.name, bad);
        let err = analyze_jd(&model, JD).await.unwrap_err();
        match err {
            PipelineError::Extraction { stage, source } => {
                assert_eq!(stage, Stage::JdAnalysis);
                assert!(source.issues.iter().any(|i| i.contains("job_title")));
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
        assert_eq!(model.call_count(), 2);
    }
}
