//! Tool registry and parallel executor.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::session::{ToolCall, ToolResult};
use crate::tools::builtin;
use crate::tools::tool::{Outcome, Tool};

/// Registry of available tools.
///
/// Reads (`get`, `definitions`, dispatch) run concurrently; registration is
/// exclusive. Registering a tool under an existing name replaces it.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with all built-in tools scoped to `work_dir`.
    ///
    /// The `task` tool is registered without a spawner; re-register it via
    /// [`builtin::task::TaskTool::with_spawner`] to enable sub-agents.
    pub fn builtin(work_dir: &Path) -> Self {
        let registry = Self::new();
        let work_dir = work_dir.to_path_buf();
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(builtin::shell::BashTool::new(work_dir.clone())),
            Arc::new(builtin::file::ReadTool::new(work_dir.clone())),
            Arc::new(builtin::file::WriteTool::new(work_dir.clone())),
            Arc::new(builtin::file::EditTool::new(work_dir.clone())),
            Arc::new(builtin::lines::ReplaceLinesTool::new(work_dir.clone())),
            Arc::new(builtin::lines::InsertLinesTool::new(work_dir.clone())),
            Arc::new(builtin::search::GlobTool::new(work_dir.clone())),
            Arc::new(builtin::search::FindFilesTool::new(work_dir.clone())),
            Arc::new(builtin::search::GrepTool::new(work_dir.clone())),
            Arc::new(builtin::task::TaskTool::new()),
        ];
        if let Ok(mut map) = registry.tools.try_write() {
            for tool in tools {
                map.insert(tool.name().to_string(), tool);
            }
        }
        registry
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// List all tool names.
    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Tool definitions for LLM function calling.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Execute a single tool by name.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(params, cancel).await
    }

    /// Dispatch a batch of tool calls concurrently.
    ///
    /// The result list is index-aligned with `calls` regardless of
    /// completion order. Every failure mode (unknown tool, unparseable
    /// input, expected tool failure, infrastructural error, cancellation,
    /// panic) is converted into a `ToolResult` with `is_error = true`; this
    /// method never fails the batch.
    pub async fn execute_parallel(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            let tool = self.get(&call.name).await;
            let call = call.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(dispatch_one(tool, call, cancel)));
        }

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(calls)
            .map(|(joined, call)| match joined {
                Ok(result) => result,
                Err(e) => ToolResult {
                    tool_call_id: call.id.clone(),
                    content: format!("Error: tool panicked: {e}"),
                    is_error: true,
                },
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one tool call to completion, shaping every failure into the result.
async fn dispatch_one(
    tool: Option<Arc<dyn Tool>>,
    call: ToolCall,
    cancel: CancellationToken,
) -> ToolResult {
    let mut result = ToolResult {
        tool_call_id: call.id.clone(),
        content: String::new(),
        is_error: false,
    };

    let tool = match tool {
        Some(t) => t,
        None => {
            result.content = format!("Error: tool not found: {}", call.name);
            result.is_error = true;
            return result;
        }
    };

    tracing::debug!(tool = %call.name, "Tool call started");
    let executed = match parse_params(&call.input) {
        Ok(params) => tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            res = tool.execute(params, &cancel) => res,
        },
        Err(e) => Err(e),
    };

    match executed {
        Ok(outcome) if outcome.success => {
            result.content = outcome.output;
        }
        Ok(outcome) => {
            result.content = format!("Error: {}", outcome.error);
            result.is_error = true;
        }
        Err(e) => {
            result.content = format!("Error: {e}");
            result.is_error = true;
        }
    }
    result
}

/// Parse a tool call's argument payload. An empty payload means no
/// arguments; anything else must be valid JSON.
fn parse_params(input: &str) -> Result<serde_json::Value, ToolError> {
    if input.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(input).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}
