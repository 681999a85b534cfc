use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::models::score::ScoreWeights;
use crate::pipeline::controller::{ControllerConfig, PipelineMode};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    /// Path to the prebuilt `pkb.json`.
    pub pkb_path: PathBuf,
    /// Enables the Redis cache; the in-process cache is used when absent.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

/// Tuning knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_mode: PipelineMode,
    pub llm_call_timeout: Duration,
    pub controller: ControllerConfig,
    /// JSON Lines log of the candidate's hand edits; replayed into the reframer when set.
    pub edit_log_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_mode: PipelineMode::Full,
            llm_call_timeout: Duration::from_secs(60),
            controller: ControllerConfig::default(),
            edit_log_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();
        let default_mode = match std::env::var("PIPELINE_MODE") {
            Ok(raw) => raw.parse::<PipelineMode>().map_err(|e| anyhow!(e))?,
            Err(_) => defaults.default_mode,
        };
        let llm_call_timeout = Duration::from_secs(parse_env(
            "LLM_CALL_TIMEOUT_SECS",
            defaults.llm_call_timeout.as_secs(),
        )?);
        let latency_budget = Duration::from_secs(parse_env(
            "LATENCY_BUDGET_SECS",
            defaults.controller.latency_budget.as_secs(),
        )?);
        let max_full_retries = parse_env("MAX_FULL_RETRIES", defaults.controller.max_full_retries)?;

        let weights = ScoreWeights::default();
        weights.validate().map_err(|e| anyhow!(e))?;

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            pkb_path: PathBuf::from(require_env("PKB_PATH")?),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            port: parse_env("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineConfig {
                default_mode,
                llm_call_timeout,
                controller: ControllerConfig {
                    max_full_retries,
                    latency_budget,
                    weights,
                    ..defaults.controller
                },
                edit_log_path: std::env::var("EDIT_LOG_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.default_mode, PipelineMode::Full);
        assert_eq!(cfg.llm_call_timeout, Duration::from_secs(60));
        assert_eq!(cfg.controller.latency_budget, Duration::from_secs(150));
        assert_eq!(cfg.controller.max_full_retries, 3);
        assert_eq!(cfg.controller.done_threshold, 90.0);
        assert_eq!(cfg.controller.patch_threshold, 80.0);
        assert!(cfg.edit_log_path.is_none());
    }

    #[test]
    fn test_parse_env_falls_back_and_rejects_garbage() {
        assert_eq!(parse_env("PLACEMENT_TEST_UNSET_KEY", 7u64).unwrap(), 7);

        std::env::set_var("PLACEMENT_TEST_BAD_PORT", "eighty");
        let err = parse_env("PLACEMENT_TEST_BAD_PORT", 8080u16).unwrap_err();
        assert!(err.to_string().contains("PLACEMENT_TEST_BAD_PORT"));
        std::env::remove_var("PLACEMENT_TEST_BAD_PORT");
    }
}
