//! End-to-end agent loop scenarios against a real store and filesystem.

mod common;

use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codewright::agent::{Agent, AgentConfig, AgentEvent};
use codewright::llm::Role;
use codewright::session::manager::SessionManager;
use codewright::session::{Session, SessionStatus, ToolCall};
use codewright::store::{LibSqlStore, Store};
use codewright::tools::ToolRegistry;

use common::{text_response, tool_response, ScriptedClient};

struct Harness {
    work_dir: TempDir,
    store: Arc<LibSqlStore>,
    sessions: Arc<SessionManager>,
    tools: Arc<ToolRegistry>,
}

impl Harness {
    async fn new() -> Self {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let sessions = Arc::new(SessionManager::new(store.clone()));
        let tools = Arc::new(ToolRegistry::builtin(work_dir.path()));
        Self {
            work_dir,
            store,
            sessions,
            tools,
        }
    }

    fn agent(&self, llm: Arc<ScriptedClient>, max_steps: usize) -> Agent {
        Agent::new(
            AgentConfig {
                name: "build".to_string(),
                model: "test-model".to_string(),
                system_prompt: None,
                temperature: 0.0,
                max_steps,
            },
            llm,
            self.tools.clone(),
            self.sessions.clone(),
        )
    }
}

#[tokio::test]
async fn create_hello_world_file() {
    let harness = Harness::new().await;
    let llm = Arc::new(ScriptedClient::new(vec![
        tool_response(vec![(
            "call_1",
            "write",
            serde_json::json!({"path": "hello.txt", "content": "hello world\n"}),
        )]),
        text_response("Created hello.txt"),
    ]));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("Create a hello world file");

    let agent = harness.agent(llm.clone(), 50);
    let (content, usage) = agent
        .run(&CancellationToken::new(), &mut session)
        .await
        .unwrap();

    assert_eq!(content, "Created hello.txt");
    assert_eq!(usage.input_tokens, 18);
    assert_eq!(usage.output_tokens, 8);
    assert_eq!(session.status, SessionStatus::Completed);

    let on_disk = std::fs::read_to_string(harness.work_dir.path().join("hello.txt")).unwrap();
    assert_eq!(on_disk, "hello world\n");

    // The persisted history pairs the assistant tool turn with its results.
    let loaded = harness.store.get_session(&session.id).await.unwrap();
    assert_eq!(loaded.status, SessionStatus::Completed);
    assert_eq!(loaded.messages.len(), 4);
    assert_eq!(loaded.messages[0].role, Role::User);
    assert_eq!(loaded.messages[1].role, Role::Assistant);
    assert_eq!(loaded.messages[1].tool_calls.len(), 1);
    assert_eq!(loaded.messages[2].role, Role::Tool);
    assert_eq!(loaded.messages[2].tool_results.len(), 1);
    assert_eq!(loaded.messages[2].tool_results[0].tool_call_id, "call_1");
    assert_eq!(
        loaded.messages[2].tool_results[0].content,
        "Created hello.txt (12 bytes)"
    );
    assert!(!loaded.messages[2].tool_results[0].is_error);
    assert_eq!(loaded.messages[3].role, Role::Assistant);
    assert_eq!(loaded.messages[3].content, "Created hello.txt");
}

#[tokio::test]
async fn ambiguous_edit_then_replace_all() {
    let harness = Harness::new().await;
    std::fs::write(harness.work_dir.path().join("notes.md"), "foo\nfoo\n").unwrap();

    let llm = Arc::new(ScriptedClient::new(vec![
        tool_response(vec![(
            "call_1",
            "edit",
            serde_json::json!({"path": "notes.md", "old_string": "foo", "new_string": "bar"}),
        )]),
        tool_response(vec![(
            "call_2",
            "edit",
            serde_json::json!({"path": "notes.md", "old_string": "foo", "new_string": "bar", "replace_all": true}),
        )]),
        text_response("Replaced foo with bar everywhere."),
    ]));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("Replace 'foo' with 'bar' in notes.md");

    let agent = harness.agent(llm, 50);
    let (content, _usage) = agent
        .run(&CancellationToken::new(), &mut session)
        .await
        .unwrap();
    assert_eq!(content, "Replaced foo with bar everywhere.");

    // First attempt failed on the ambiguous match and left the file alone;
    // the model saw the error and retried with replace_all.
    assert_eq!(session.messages[2].tool_results[0].tool_call_id, "call_1");
    assert!(session.messages[2].tool_results[0].is_error);
    assert!(session.messages[2].tool_results[0]
        .content
        .contains("found 2 times"));
    assert_eq!(session.messages[4].tool_results[0].tool_call_id, "call_2");
    assert!(!session.messages[4].tool_results[0].is_error);
    assert_eq!(
        session.messages[4].tool_results[0].content,
        "Replaced 2 occurrences in notes.md"
    );

    let on_disk = std::fs::read_to_string(harness.work_dir.path().join("notes.md")).unwrap();
    assert_eq!(on_disk, "bar\nbar\n");
}

#[tokio::test]
async fn resume_repairs_dangling_tool_call() {
    let harness = Harness::new().await;

    // Simulate an interrupted run: the assistant turn was recorded but its
    // tool results never arrived.
    let mut session = Session::new("build");
    session.add_user_message("do the task");
    session.add_assistant_message(
        "",
        vec![ToolCall {
            id: "orphan".to_string(),
            name: "bash".to_string(),
            input: r#"{"command":"echo hi"}"#.to_string(),
        }],
    );
    harness.store.save_session(&session).await.unwrap();

    let llm = Arc::new(ScriptedClient::new(vec![text_response("done")]));
    let agent = harness.agent(llm.clone(), 50);

    let mut resumed = harness.store.get_session(&session.id).await.unwrap();
    let (content, _usage) = agent
        .run(&CancellationToken::new(), &mut resumed)
        .await
        .unwrap();
    assert_eq!(content, "done");

    // The dangling assistant turn was dropped before the LLM call: the
    // request history contained only the user message.
    let requests = llm.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].role, Role::User);

    let loaded = harness.store.get_session(&session.id).await.unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[0].role, Role::User);
    assert_eq!(loaded.messages[1].role, Role::Assistant);
    assert_eq!(loaded.messages[1].content, "done");
}

#[tokio::test]
async fn cancellation_pauses_session() {
    let harness = Harness::new().await;
    let llm = Arc::new(ScriptedClient::new(vec![text_response("never used")]));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("task");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let agent = harness.agent(llm, 50);
    let result = agent.run(&cancel, &mut session).await;
    assert!(matches!(result, Err(codewright::error::Error::Cancelled)));
    assert_eq!(session.status, SessionStatus::Paused);

    let loaded = harness.store.get_session(&session.id).await.unwrap();
    assert_eq!(loaded.status, SessionStatus::Paused);
}

#[tokio::test]
async fn max_steps_terminates_as_completed() {
    let harness = Harness::new().await;
    let llm = Arc::new(ScriptedClient::repeating(tool_response(vec![(
        "loop_call",
        "bash",
        serde_json::json!({"command": "true"}),
    )])));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("never-ending task");

    let agent = harness.agent(llm, 3);
    let (content, _usage) = agent
        .run(&CancellationToken::new(), &mut session)
        .await
        .unwrap();

    assert_eq!(content, "");
    assert_eq!(session.status, SessionStatus::Completed);
    // 1 user message + 3 steps of (assistant + tool).
    assert_eq!(session.messages.len(), 7);
}

#[tokio::test]
async fn llm_error_fails_session() {
    let harness = Harness::new().await;
    let llm = Arc::new(ScriptedClient::new(Vec::new()));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("task");

    let agent = harness.agent(llm, 50);
    let result = agent.run(&CancellationToken::new(), &mut session).await;
    assert!(matches!(result, Err(codewright::error::Error::Llm(_))));
    assert_eq!(session.status, SessionStatus::Failed);

    let loaded = harness.store.get_session(&session.id).await.unwrap();
    assert_eq!(loaded.status, SessionStatus::Failed);
}

#[tokio::test]
async fn streaming_client_emits_deltas_and_step_events() {
    let harness = Harness::new().await;
    let llm = Arc::new(
        ScriptedClient::new(vec![
            tool_response(vec![(
                "call_1",
                "bash",
                serde_json::json!({"command": "echo hi"}),
            )]),
            text_response("all done here"),
        ])
        .with_streaming(),
    );

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("task");

    let events: Arc<Mutex<Vec<AgentEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback = move |event: AgentEvent| {
        sink.lock().unwrap().push(event);
    };

    let agent = harness.agent(llm, 50);
    let (content, _usage) = agent
        .run_with_events(&CancellationToken::new(), &mut session, Some(&callback))
        .await
        .unwrap();
    assert_eq!(content, "all done here");

    let events = events.lock().unwrap();
    let deltas: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::AssistantDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, "all done here");

    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolExecuting { step: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolCompleted { step: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::StepCompleted { step: 2 })));
}

#[tokio::test]
async fn parallel_tool_batch_results_stay_aligned() {
    let harness = Harness::new().await;
    let llm = Arc::new(ScriptedClient::new(vec![
        tool_response(vec![
            (
                "w1",
                "write",
                serde_json::json!({"path": "a.txt", "content": "alpha"}),
            ),
            (
                "r1",
                "read",
                serde_json::json!({"path": "missing.txt"}),
            ),
            (
                "w2",
                "write",
                serde_json::json!({"path": "b.txt", "content": "beta"}),
            ),
        ]),
        text_response("finished"),
    ]));

    let mut session = harness.sessions.create("build").await.unwrap();
    session.add_user_message("write two files and read one");

    let agent = harness.agent(llm, 50);
    agent
        .run(&CancellationToken::new(), &mut session)
        .await
        .unwrap();

    let tool_msg = &session.messages[2];
    assert_eq!(tool_msg.role, Role::Tool);
    let ids: Vec<&str> = tool_msg
        .tool_results
        .iter()
        .map(|r| r.tool_call_id.as_str())
        .collect();
    assert_eq!(ids, vec!["w1", "r1", "w2"]);
    assert!(!tool_msg.tool_results[0].is_error);
    assert!(tool_msg.tool_results[1].is_error);
    assert!(!tool_msg.tool_results[2].is_error);
}
