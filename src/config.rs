//! Configuration values consumed by the agent core.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration.
///
/// Environment overrides and config-file merging are the caller's concern;
/// this struct is just the values object the core consumes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem root for tool operations. Relative tool paths resolve
    /// against this directory.
    pub work_dir: PathBuf,
    /// Directory holding the session database.
    pub data_path: PathBuf,
    /// Model identifier passed through to the LLM client.
    pub default_model: String,
    /// Maximum agent-loop steps per run.
    pub max_steps: usize,
    /// Sampling temperature passed through to the LLM client.
    pub temperature: f64,
    /// System prompt for agent runs. `None` selects the built-in prompt.
    pub system_prompt: Option<String>,
    /// Interval between scheduler wake-ups.
    pub scheduler_interval: Duration,
    /// Absolute cap on a single scheduled job execution.
    pub job_execution_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            data_path: PathBuf::from("./data"),
            default_model: "claude-sonnet-4-20250514".to_string(),
            max_steps: 50,
            temperature: 0.7,
            system_prompt: None,
            scheduler_interval: Duration::from_secs(60),
            job_execution_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("CODEWRIGHT_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            data_path: std::env::var("CODEWRIGHT_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            default_model: std::env::var("CODEWRIGHT_MODEL").unwrap_or(defaults.default_model),
            max_steps: std::env::var("CODEWRIGHT_MAX_STEPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_steps),
            temperature: std::env::var("CODEWRIGHT_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
            system_prompt: std::env::var("CODEWRIGHT_SYSTEM_PROMPT").ok(),
            scheduler_interval: std::env::var("CODEWRIGHT_SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler_interval),
            job_execution_timeout: std::env::var("CODEWRIGHT_JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_execution_timeout),
        }
    }
}
