//! Tool contract shared by all agent capabilities.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// The outcome of a tool execution, shown to the model.
///
/// Expected failures (bad parameters, file not found, ambiguous edit) are
/// reported here with `success = false`; infrastructural failures surface as
/// [`ToolError`] instead.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl Outcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }

    /// Failure that still carries partial output (e.g. a timed-out command).
    pub fn fail_with_output(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: error.into(),
        }
    }
}

/// An executable agent capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool identifier.
    fn name(&self) -> &str;

    /// Free-text description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema describing accepted parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute with parsed parameters. The cancellation token is derived
    /// from the agent run; long-running tools must observe it.
    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError>;
}

// ── Parameter helpers ───────────────────────────────────────────────

pub(crate) fn opt_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub(crate) fn opt_u64(params: &serde_json::Value, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

pub(crate) fn opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub(crate) fn opt_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub(crate) fn opt_str_list(params: &serde_json::Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve a tool path argument: absolute paths are used as given, relative
/// paths resolve against the configured work directory.
pub(crate) fn resolve_path(work_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        work_dir.join(p)
    }
}

/// Largest byte index `<= i` that is a valid char boundary in `s`.
pub(crate) fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
