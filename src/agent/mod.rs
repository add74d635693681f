//! Agent loop: drive an LLM through tool use until the task completes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, Role, StreamEvent, TokenUsage,
};
use crate::session::manager::SessionManager;
use crate::session::{Session, SessionStatus};
use crate::tools::ToolRegistry;

/// Default maximum number of agent-loop steps.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Default system prompt for agent runs.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI coding assistant. You help users with software engineering tasks by using the available tools.

Guidelines:
- Use tools to explore and modify the codebase
- Read files before editing to understand context
- Make minimal, targeted changes
- Explain your reasoning before making changes
- If a task is unclear, ask for clarification
- If you encounter errors, try to understand and fix them

Available tools allow you to:
- Execute shell commands (bash)
- Read file contents (read)
- Write new files (write)
- Edit existing files with string replacement (edit)
- Find files by pattern (glob)
- Search file contents (grep)

Be concise but thorough. Complete the user's task step by step.";

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Logical role name, recorded as the session's `agent_id`.
    pub name: String,
    pub model: String,
    /// `None` selects [`DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
    pub temperature: f64,
    /// `0` selects [`DEFAULT_MAX_STEPS`].
    pub max_steps: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "build".to_string(),
            model: String::new(),
            system_prompt: None,
            temperature: 0.7,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Streaming update emitted while the agent executes a run.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A fragment of assistant text arrived from the model.
    AssistantDelta { step: usize, delta: String },
    /// Parallel tool dispatch started for this step.
    ToolExecuting { step: usize },
    /// All tool results for this step were collected.
    ToolCompleted { step: usize },
    /// The step finished (model turn plus any tool turn).
    StepCompleted { step: usize },
}

/// Callback receiving [`AgentEvent`]s during a run.
pub type EventCallback<'a> = &'a (dyn Fn(AgentEvent) + Send + Sync);

/// An AI agent that executes tasks through a tool-using LLM loop.
pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
}

impl Agent {
    pub fn new(
        mut config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        if config.max_steps == 0 {
            config.max_steps = DEFAULT_MAX_STEPS;
        }
        if config.system_prompt.is_none() {
            config.system_prompt = Some(DEFAULT_SYSTEM_PROMPT.to_string());
        }
        Self {
            config,
            llm,
            tools,
            sessions,
        }
    }

    /// Execute the agent against a session.
    ///
    /// The initial user message must already be appended to the session so
    /// callers can display it eagerly. Returns the final assistant content
    /// and the total token usage across all steps.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
    ) -> Result<(String, TokenUsage), Error> {
        self.run_with_events(cancel, session, None).await
    }

    /// Execute the agent, emitting streaming events when a callback is given.
    pub async fn run_with_events(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        on_event: Option<EventCallback<'_>>,
    ) -> Result<(String, TokenUsage), Error> {
        info!(session = %session.id, "Agent run started");
        let result = self.run_loop(cancel, session, on_event).await;
        match &result {
            Ok((_, usage)) => info!(
                session = %session.id,
                total_input = usage.input_tokens,
                total_output = usage.output_tokens,
                "Agent run completed"
            ),
            Err(e) => warn!(session = %session.id, "Agent run failed: {e}"),
        }
        result
    }

    async fn run_loop(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        on_event: Option<EventCallback<'_>>,
    ) -> Result<(String, TokenUsage), Error> {
        let mut step = 0usize;
        let mut total_usage = TokenUsage::default();

        repair_dangling_tool_calls(session);

        loop {
            if cancel.is_cancelled() {
                session.set_status(SessionStatus::Paused);
                self.persist(session).await;
                return Err(Error::Cancelled);
            }

            if step >= self.config.max_steps {
                session.set_status(SessionStatus::Completed);
                self.persist(session).await;
                return Ok((session.last_assistant_content(), total_usage));
            }

            step += 1;
            debug!(step, max_steps = self.config.max_steps, "Agent step");

            if session.status != SessionStatus::Running {
                session.set_status(SessionStatus::Running);
            }

            let request = self.build_request(session).await;
            let response = match self.call_llm(&request, step, on_event).await {
                Ok(response) => response,
                Err(e) => {
                    session.set_status(SessionStatus::Failed);
                    self.persist(session).await;
                    return Err(e.into());
                }
            };

            total_usage.add(response.usage);

            if response.tool_calls.is_empty() {
                session.add_assistant_message(response.content.clone(), Vec::new());
                session.set_status(SessionStatus::Completed);
                self.persist(session).await;
                emit(on_event, AgentEvent::StepCompleted { step });
                return Ok((response.content, total_usage));
            }

            let tool_calls: Vec<crate::session::ToolCall> =
                response.tool_calls.into_iter().map(Into::into).collect();
            session.add_assistant_message(response.content, tool_calls.clone());

            emit(on_event, AgentEvent::ToolExecuting { step });
            let results = self.tools.execute_parallel(&tool_calls, cancel).await;
            session.add_tool_results(results);

            self.persist(session).await;
            emit(on_event, AgentEvent::ToolCompleted { step });
            emit(on_event, AgentEvent::StepCompleted { step });
        }
    }

    async fn call_llm(
        &self,
        request: &ChatRequest,
        step: usize,
        on_event: Option<EventCallback<'_>>,
    ) -> Result<ChatResponse, crate::error::LlmError> {
        if !self.llm.supports_streaming() {
            return self.llm.chat(request).await;
        }

        let forward = |event: StreamEvent| {
            if let (Some(callback), StreamEvent::ContentDelta(delta)) = (on_event, event) {
                if !delta.is_empty() {
                    callback(AgentEvent::AssistantDelta { step, delta });
                }
            }
        };
        self.llm.chat_stream(request, &forward).await
    }

    async fn build_request(&self, session: &Session) -> ChatRequest {
        let messages = session
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
                tool_calls: m.tool_calls.iter().map(Into::into).collect(),
                tool_results: m.tool_results.iter().map(Into::into).collect(),
            })
            .collect();

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            tools: self.tools.definitions().await,
            temperature: self.config.temperature,
            max_tokens: None,
            system_prompt: self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) = self.sessions.save(session).await {
            warn!(session = %session.id, "Failed to persist session: {e}");
        }
    }
}

fn emit(on_event: Option<EventCallback<'_>>, event: AgentEvent) {
    if let Some(callback) = on_event {
        callback(event);
    }
}

/// Remove assistant messages whose tool calls have no recorded results.
///
/// Interruption between an assistant turn and its tool results leaves the
/// history in a state the model cannot consume. Restoring the last
/// consistent prefix means dropping exactly those assistant turns, nothing
/// more.
fn repair_dangling_tool_calls(session: &mut Session) {
    let mut i = session.messages.len();
    while i > 0 {
        i -= 1;
        let msg = &session.messages[i];
        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            let has_results = session
                .messages
                .get(i + 1)
                .map(|next| next.role == Role::Tool)
                .unwrap_or(false);
            if !has_results {
                warn!(session = %session.id, "Removing incomplete tool-call message (no results)");
                session.messages.remove(i);
            }
        }
    }
}
