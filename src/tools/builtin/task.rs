//! Sub-agent spawning tool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ToolError};
use crate::tools::tool::{opt_str, Outcome, Tool};

/// Spawns a sub-agent run and returns its final content.
///
/// Implementations are expected to create a child session linked to the
/// calling session and thread the sub-agent's final content back as the
/// return value.
#[async_trait]
pub trait SubAgentSpawner: Send + Sync {
    async fn spawn(
        &self,
        agent_type: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error>;
}

/// Requests a sub-agent for a delegated task.
pub struct TaskTool {
    spawner: Option<Arc<dyn SubAgentSpawner>>,
}

impl TaskTool {
    /// Create a task tool with no spawner; execution reports a clear failure.
    pub fn new() -> Self {
        Self { spawner: None }
    }

    pub fn with_spawner(spawner: Arc<dyn SubAgentSpawner>) -> Self {
        Self {
            spawner: Some(spawner),
        }
    }
}

impl Default for TaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Launch a sub-agent to handle a specific task autonomously.\n\
         Use this for complex multi-step tasks or to parallelize work.\n\
         The sub-agent inherits the parent context and has access to the same tools.\n\
         \n\
         Available agent types:\n\
         - general: General-purpose agent for research and multi-step tasks\n\
         - explore: Fast read-only agent for codebase exploration\n\
         - developer: Code implementation and debugging\n\
         - tester: Code review and test writing\n\
         - docs: Documentation generation"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_type": {
                    "type": "string",
                    "description": "Type of sub-agent to spawn (general, explore, developer, tester, docs)",
                    "enum": ["general", "explore", "developer", "tester", "docs"]
                },
                "prompt": {
                    "type": "string",
                    "description": "The task/instruction for the sub-agent"
                },
                "description": {
                    "type": "string",
                    "description": "A short (3-5 words) description of the task"
                }
            },
            "required": ["agent_type", "prompt", "description"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let agent_type = match opt_str(&params, "agent_type") {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(Outcome::fail("agent_type is required")),
        };
        let prompt = match opt_str(&params, "prompt") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("prompt is required")),
        };

        let spawner = match &self.spawner {
            Some(s) => s,
            None => return Ok(Outcome::fail("sub-agent spawning not configured")),
        };

        match spawner.spawn(agent_type, prompt, cancel).await {
            Ok(result) => Ok(Outcome::ok(result)),
            Err(e) => Ok(Outcome::fail(format!("failed to spawn sub-agent: {e}"))),
        }
    }
}
