use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The five scored quality components, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    KeywordMatch,
    SemanticAlignment,
    FormatCompliance,
    AchievementDensity,
    HumanReadability,
}

impl ScoreComponent {
    pub const ALL: [ScoreComponent; 5] = [
        ScoreComponent::KeywordMatch,
        ScoreComponent::SemanticAlignment,
        ScoreComponent::FormatCompliance,
        ScoreComponent::AchievementDensity,
        ScoreComponent::HumanReadability,
    ];
}

impl fmt::Display for ScoreComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoreComponent::KeywordMatch => "keyword_match",
            ScoreComponent::SemanticAlignment => "semantic_alignment",
            ScoreComponent::FormatCompliance => "format_compliance",
            ScoreComponent::AchievementDensity => "achievement_density",
            ScoreComponent::HumanReadability => "human_readability",
        };
        f.write_str(s)
    }
}

/// Component weights. Must sum to exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub keyword_match: f64,
    pub semantic_alignment: f64,
    pub format_compliance: f64,
    pub achievement_density: f64,
    pub human_readability: f64,
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            keyword_match: 0.40,
            semantic_alignment: 0.25,
            format_compliance: 0.15,
            achievement_density: 0.10,
            human_readability: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, component: ScoreComponent) -> f64 {
        match component {
            ScoreComponent::KeywordMatch => self.keyword_match,
            ScoreComponent::SemanticAlignment => self.semantic_alignment,
            ScoreComponent::FormatCompliance => self.format_compliance,
            ScoreComponent::AchievementDensity => self.achievement_density,
            ScoreComponent::HumanReadability => self.human_readability,
        }
    }

    pub fn sum(&self) -> f64 {
        ScoreComponent::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    /// Rejects weight sets that are negative or do not sum to 1.0.
    pub fn validate(&self) -> Result<(), String> {
        if ScoreComponent::ALL.iter().any(|c| self.weight(*c) < 0.0) {
            return Err("score weights must be non-negative".to_string());
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("score weights must sum to 1.0, got {sum}"));
        }
        Ok(())
    }
}

/// One iteration's score. Computed fresh each iteration, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Component → score in [0, 100] (already clamped).
    pub component_scores: BTreeMap<ScoreComponent, f64>,
    pub total: f64,
    pub weights: ScoreWeights,
    /// True when the model judge timed out and the judged components fell back to 0.
    #[serde(default)]
    pub judge_timed_out: bool,
}

impl ScoreReport {
    pub fn component(&self, component: ScoreComponent) -> f64 {
        self.component_scores.get(&component).copied().unwrap_or(0.0)
    }

    /// Lowest-scoring component; ties resolve to canonical order.
    pub fn weakest_component(&self) -> ScoreComponent {
        let mut weakest = ScoreComponent::KeywordMatch;
        let mut lowest = f64::INFINITY;
        for component in ScoreComponent::ALL {
            let value = self.component(component);
            if value < lowest {
                lowest = value;
                weakest = component;
            }
        }
        weakest
    }
}
