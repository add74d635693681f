//! Provider-agnostic LLM client interface.
//!
//! Concrete provider implementations (HTTP dialects, auth, retries) live
//! outside the core; the agent only depends on the [`LlmClient`] trait and
//! the request/response types here. Call-id correlation is preserved
//! end-to-end: every [`ToolCall::id`] handed out in a response must be echoed
//! back in the matching [`ToolResult::tool_call_id`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }

    /// Parse a role from its storage string. Unknown strings map to `User`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// A chat message in provider-neutral shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }
}

/// A model-issued request to invoke a named tool.
///
/// `input` is the raw JSON argument payload as produced by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

/// The outcome of one tool call, correlated by `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
}

/// A chat completion response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: String,
}

/// Token usage for one or more LLM calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Incremental events delivered while a streaming completion is in flight.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text arrived.
    ContentDelta(String),
    /// A fragment of a tool-call payload arrived.
    ToolCallDelta { id: String, partial_input: String },
    /// The stream finished; the aggregated response follows.
    End,
}

/// Callback receiving [`StreamEvent`]s during a streaming completion.
pub type StreamCallback<'a> = &'a (dyn Fn(StreamEvent) + Send + Sync);

/// Provider-agnostic LLM client.
///
/// Streaming is an optional capability: clients that cannot stream keep the
/// default `chat_stream`, which performs a synchronous completion and emits
/// only the terminal [`StreamEvent::End`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Synchronous completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Whether `chat_stream` delivers real incremental events.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streaming completion. The aggregated response is returned after the
    /// stream ends; events are best-effort.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_event: StreamCallback<'_>,
    ) -> Result<ChatResponse, LlmError> {
        let response = self.chat(request).await?;
        on_event(StreamEvent::End);
        Ok(response)
    }
}
