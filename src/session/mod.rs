//! Session entity model.
//!
//! A session is the durable record of one agent's conversation: an ordered
//! sequence of messages, each optionally carrying the tool calls an assistant
//! turn produced and the results a tool turn collected. The persistence layer
//! treats tool payloads opaquely; only the agent interprets them.

pub mod manager;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm;
use crate::llm::Role;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
    Paused,
    InputRequired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Paused => "paused",
            SessionStatus::InputRequired => "input_required",
        }
    }

    /// Parse a status from its storage string. Unknown strings map to `Created`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "running" => SessionStatus::Running,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "paused" => SessionStatus::Paused,
            "input_required" => SessionStatus::InputRequired,
            _ => SessionStatus::Created,
        }
    }
}

/// A tool invocation recorded on an assistant message.
///
/// `input` is the argument payload exactly as the model produced it. It is
/// persisted opaquely and only parsed at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

/// The recorded outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl From<llm::ToolCall> for ToolCall {
    fn from(tc: llm::ToolCall) -> Self {
        Self {
            id: tc.id,
            name: tc.name,
            input: tc.input,
        }
    }
}

impl From<&ToolCall> for llm::ToolCall {
    fn from(tc: &ToolCall) -> Self {
        Self {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input: tc.input.clone(),
        }
    }
}

impl From<llm::ToolResult> for ToolResult {
    fn from(tr: llm::ToolResult) -> Self {
        Self {
            tool_call_id: tr.tool_call_id,
            content: tr.content,
            is_error: tr.is_error,
        }
    }
}

impl From<&ToolResult> for llm::ToolResult {
    fn from(tr: &ToolResult) -> Self {
        Self {
            tool_call_id: tr.tool_call_id.clone(),
            content: tr.content.clone(),
            is_error: tr.is_error,
        }
    }
}

/// One message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A durable agent session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Logical role name of the agent driving the session
    /// (e.g. `build`, `plan`, `job-runner`).
    pub agent_id: String,
    pub parent_id: Option<String>,
    pub job_id: Option<String>,
    pub title: String,
    pub status: SessionStatus,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    /// Create a new top-level session.
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            parent_id: None,
            job_id: None,
            title: String::new(),
            status: SessionStatus::Created,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Create a sub-session linked to a parent.
    pub fn with_parent(agent_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        let mut sess = Self::new(agent_id);
        sess.parent_id = Some(parent_id.into());
        sess
    }

    /// Create a session spawned by the scheduler for a recurring job.
    pub fn with_job(agent_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        let mut sess = Self::new(agent_id);
        sess.job_id = Some(job_id.into());
        sess
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::new(Role::User, content));
    }

    /// Append an assistant turn, optionally carrying tool calls.
    pub fn add_assistant_message(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        let mut msg = Message::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        self.add_message(msg);
    }

    /// Append the tool turn answering the previous assistant turn.
    pub fn add_tool_results(&mut self, results: Vec<ToolResult>) {
        let mut msg = Message::new(Role::Tool, "");
        msg.tool_results = results;
        self.add_message(msg);
    }

    /// Content of the most recent assistant message with non-empty content.
    pub fn last_assistant_content(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            SessionStatus::Created,
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Paused,
            SessionStatus::InputRequired,
        ] {
            assert_eq!(SessionStatus::from_str_lossy(status.as_str()), status);
        }
    }

    #[test]
    fn new_session_starts_empty() {
        let sess = Session::new("build");
        assert_eq!(sess.agent_id, "build");
        assert_eq!(sess.status, SessionStatus::Created);
        assert!(sess.messages.is_empty());
        assert!(sess.parent_id.is_none());
        assert!(sess.job_id.is_none());
        assert!(sess.title.is_empty());
    }

    #[test]
    fn message_helpers_set_roles() {
        let mut sess = Session::new("build");
        sess.add_user_message("do the thing");
        sess.add_assistant_message(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "bash".into(),
                input: r#"{"command":"ls"}"#.into(),
            }],
        );
        sess.add_tool_results(vec![ToolResult {
            tool_call_id: "c1".into(),
            content: "ok".into(),
            is_error: false,
        }]);

        assert_eq!(sess.messages.len(), 3);
        assert_eq!(sess.messages[0].role, Role::User);
        assert_eq!(sess.messages[1].role, Role::Assistant);
        assert_eq!(sess.messages[1].tool_calls.len(), 1);
        assert_eq!(sess.messages[2].role, Role::Tool);
        assert_eq!(sess.messages[2].tool_results[0].tool_call_id, "c1");
    }

    #[test]
    fn last_assistant_content_skips_empty() {
        let mut sess = Session::new("build");
        sess.add_user_message("hi");
        sess.add_assistant_message("first", Vec::new());
        sess.add_assistant_message("", Vec::new());
        assert_eq!(sess.last_assistant_content(), "first");
    }
}
