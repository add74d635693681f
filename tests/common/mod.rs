//! Shared test doubles for integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use codewright::error::LlmError;
use codewright::llm::{
    ChatRequest, ChatResponse, LlmClient, StreamCallback, StreamEvent, TokenUsage, ToolCall,
};

/// An LLM client that replays a fixed script of responses.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<ChatResponse>>,
    /// When the script runs dry, replay this response forever.
    repeat: Option<ChatResponse>,
    pub requests: Mutex<Vec<ChatRequest>>,
    streaming: bool,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            streaming: false,
        }
    }

    /// A client that replays the same response forever.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
            streaming: false,
        }
    }

    /// Enable the streaming capability; deltas are emitted word by word.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    fn next_response(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front().or_else(|| self.repeat.clone()) {
            Some(response) => Ok(response),
            None => Err(LlmError::InvalidResponse {
                provider: "scripted".to_string(),
                reason: "script exhausted".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.next_response(request)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_event: StreamCallback<'_>,
    ) -> Result<ChatResponse, LlmError> {
        let response = self.next_response(request)?;
        for word in response.content.split_inclusive(' ') {
            on_event(StreamEvent::ContentDelta(word.to_string()));
        }
        on_event(StreamEvent::End);
        Ok(response)
    }
}

pub fn text_response(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            input_tokens: 8,
            output_tokens: 3,
        },
        stop_reason: "end_turn".to_string(),
    }
}

pub fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: calls
            .into_iter()
            .map(|(id, name, input)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input: input.to_string(),
            })
            .collect(),
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
        stop_reason: "tool_use".to_string(),
    }
}
