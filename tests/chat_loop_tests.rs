//! Chat / tool-use loop tests.
//!
//! A scripted LLM provider drives the loop deterministically: each test
//! wires a provider returning tool calls or plain content on successive
//! rounds, a registry of counting tools, and an in-memory store, then
//! asserts the loop's termination, event grammar, and persistence.

use agentflow::agentflow::chat::{ChatEvent, ChatService, MAX_TOOL_ITERATIONS};
use agentflow::agentflow::error::PlatformError;
use agentflow::agentflow::llm::{
    ChatRequest, ChunkStream, LlmProvider, LlmResponse, ToolCallRequest,
};
use agentflow::agentflow::models::Agent;
use agentflow::agentflow::repository::{MemoryStore, MessageRepository};
use agentflow::agentflow::tools::{
    Tool, ToolDefinition, ToolError, ToolRegistry, ToolResult,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Returns scripted responses in order; repeats the last behavior (plain
/// "done" content) when the script is exhausted.  Counts LLM calls.
struct ScriptedProvider {
    script: Mutex<VecDeque<LlmResponse>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn content(text: &str) -> LlmResponse {
        LlmResponse {
            content: text.to_string(),
            model: String::from("mock"),
            tool_calls: vec![],
            usage: None,
        }
    }

    fn tool_call(id: &str, name: &str, arguments: Value) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            model: String::from("mock"),
            tool_calls: vec![ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
            usage: None,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<LlmResponse, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::content("done")))
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream, PlatformError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

/// A provider that emits one tool call on every round, forever.
struct RelentlessToolCaller {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for RelentlessToolCaller {
    async fn chat(&self, _request: ChatRequest) -> Result<LlmResponse, PlatformError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            content: String::new(),
            model: String::from("mock"),
            tool_calls: vec![ToolCallRequest {
                id: format!("call_{}", n),
                name: String::from("counter"),
                arguments: json!({}),
            }],
            usage: None,
        })
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream, PlatformError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

/// A provider that fails on the Nth call.
struct FlakyProvider {
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<LlmResponse, PlatformError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.fail_on {
            return Err(PlatformError::Upstream(String::from("provider melted")));
        }
        Ok(LlmResponse {
            content: String::new(),
            model: String::from("mock"),
            tool_calls: vec![ToolCallRequest {
                id: format!("call_{}", n),
                name: String::from("counter"),
                arguments: json!({}),
            }],
            usage: None,
        })
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream, PlatformError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

struct CountingTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("counter", "Counts executions")
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        let n = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolResult::success(json!({ "executions": n })))
    }
}

struct AlwaysFailingTool;

#[async_trait]
impl Tool for AlwaysFailingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("flaky", "Always fails")
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::failure("tool exploded"))
    }
}

fn agent_with_tools(tools: &[&str]) -> Agent {
    Agent::new(
        Uuid::new_v4(),
        "Test Agent",
        "You are a test agent.",
        "mock-model",
    )
    .with_tools(tools.iter().map(|t| t.to_string()).collect())
}

fn service(
    provider: Arc<dyn LlmProvider>,
    executions: Arc<AtomicUsize>,
) -> (Arc<ChatService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool { executions }));
    registry.register(Arc::new(AlwaysFailingTool));
    let service = Arc::new(ChatService::new(
        provider,
        store.clone(),
        store.clone(),
        Arc::new(registry),
    ));
    (service, store)
}

#[tokio::test]
async fn test_plain_response_round_trip() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::content(
        "Hello there",
    )]));
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider.clone(), executions.clone());
    let agent = agent_with_tools(&[]);

    let (conv_id, content) = service
        .chat(&agent, Uuid::new_v4(), "hi", None)
        .await
        .unwrap();

    assert_eq!(content, "Hello there");
    assert_eq!(provider.calls(), 1);
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    // Persisted: user message + final assistant message.
    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(messages[1].content, "Hello there");
}

#[tokio::test]
async fn test_tool_round_then_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("call_1", "counter", json!({"reason": "count"})),
        ScriptedProvider::content("Counted once."),
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider.clone(), executions.clone());
    let agent = agent_with_tools(&["counter"]);

    let (conv_id, content) = service
        .chat(&agent, Uuid::new_v4(), "count please", None)
        .await
        .unwrap();

    assert_eq!(content, "Counted once.");
    assert_eq!(provider.calls(), 2);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // user, assistant tool-call marker, tool result, final assistant.
    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

    // The tool result message is the serialised ToolResult, keyed by the
    // call id; the marker carries the structured attachment.
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    let result: Value = serde_json::from_str(&messages[2].content).unwrap();
    assert_eq!(result["success"], true);
    let attachment = messages[1].tool_calls.as_ref().unwrap();
    assert_eq!(attachment["name"], "counter");
    assert_eq!(attachment["tool_call_id"], "call_1");
}

#[tokio::test]
async fn test_loop_terminates_at_iteration_cap() {
    let provider = Arc::new(RelentlessToolCaller {
        calls: AtomicUsize::new(0),
    });
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider.clone(), executions.clone());
    let agent = agent_with_tools(&["counter"]);

    let (conv_id, stream) = service
        .chat_stream_with_tools(&agent, Uuid::new_v4(), "go", None)
        .await
        .unwrap();
    let events: Vec<ChatEvent> = stream.collect().await;

    // Exactly MAX_TOOL_ITERATIONS LLM calls and tool executions.
    assert_eq!(provider.calls.load(Ordering::SeqCst), MAX_TOOL_ITERATIONS);
    assert_eq!(executions.load(Ordering::SeqCst), MAX_TOOL_ITERATIONS);

    // Stream: Start, then 5 ToolCall/ToolResult pairs, then Done.
    assert!(matches!(events.first(), Some(ChatEvent::Start { .. })));
    assert!(matches!(events.last(), Some(ChatEvent::Done)));
    let tool_calls = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::ToolCall { .. }))
        .count();
    let tool_results = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::ToolResult { .. }))
        .count();
    assert_eq!(tool_calls, MAX_TOOL_ITERATIONS);
    assert_eq!(tool_results, MAX_TOOL_ITERATIONS);

    // Persisted: the initial user message plus 5 assistant + 5 tool
    // messages; no empty final assistant message.
    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let count = |role: &str| messages.iter().filter(|m| m.role == role).count();
    assert_eq!(count("user"), 1);
    assert_eq!(count("assistant"), MAX_TOOL_ITERATIONS);
    assert_eq!(count("tool"), MAX_TOOL_ITERATIONS);
    assert_eq!(messages.len(), 1 + 2 * MAX_TOOL_ITERATIONS);
}

#[tokio::test]
async fn test_stream_event_causality() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("call_a", "counter", json!({})),
        ScriptedProvider::tool_call("call_b", "counter", json!({})),
        ScriptedProvider::content("All counted."),
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, _) = service(provider, executions);
    let agent = agent_with_tools(&["counter"]);

    let (_, stream) = service
        .chat_stream_with_tools(&agent, Uuid::new_v4(), "go", None)
        .await
        .unwrap();
    let events: Vec<ChatEvent> = stream.collect().await;

    // Each ToolCall has exactly one matching ToolResult, emitted after it.
    let mut pending: Vec<String> = Vec::new();
    let mut resolved: Vec<String> = Vec::new();
    let mut saw_content = false;
    for event in &events {
        match event {
            ChatEvent::ToolCall { id, .. } => {
                assert!(!saw_content, "tool_call after content");
                pending.push(id.clone());
            }
            ChatEvent::ToolResult { id, .. } => {
                let index = pending
                    .iter()
                    .position(|p| p == id)
                    .expect("tool_result without preceding tool_call");
                resolved.push(pending.remove(index));
            }
            ChatEvent::Content { .. } => {
                assert!(pending.is_empty(), "content before unresolved tool_call");
                saw_content = true;
            }
            _ => {}
        }
    }
    assert!(pending.is_empty());
    assert_eq!(resolved, vec!["call_a", "call_b"]);
    assert!(saw_content);
    assert!(matches!(events.last(), Some(ChatEvent::Done)));
}

#[tokio::test]
async fn test_tool_failure_is_fed_back_not_fatal() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("call_1", "flaky", json!({})),
        ScriptedProvider::content("The tool failed, sorry."),
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider, executions);
    let agent = agent_with_tools(&["flaky"]);

    let (conv_id, content) = service
        .chat(&agent, Uuid::new_v4(), "try the tool", None)
        .await
        .unwrap();

    assert_eq!(content, "The tool failed, sorry.");

    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let tool_message = messages.iter().find(|m| m.role == "tool").unwrap();
    let result: Value = serde_json::from_str(&tool_message.content).unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error"], "tool exploded");
}

#[tokio::test]
async fn test_unknown_tool_name_is_contained() {
    // The agent allow-lists a tool that is not registered; dispatch
    // surfaces a failure result, not a crash.
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("call_1", "ghost", json!({})),
        ScriptedProvider::content("No such tool."),
    ]));
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider, executions);
    let agent = agent_with_tools(&["ghost"]);

    let (conv_id, content) = service
        .chat(&agent, Uuid::new_v4(), "use the ghost", None)
        .await
        .unwrap();
    assert_eq!(content, "No such tool.");

    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let tool_message = messages.iter().find(|m| m.role == "tool").unwrap();
    let result: Value = serde_json::from_str(&tool_message.content).unwrap();
    assert_eq!(result["error"], "Unknown tool: ghost");
}

#[tokio::test]
async fn test_llm_error_emits_error_event_with_partial_durability() {
    let provider = Arc::new(FlakyProvider {
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, store) = service(provider, executions);
    let agent = agent_with_tools(&["counter"]);

    let (conv_id, stream) = service
        .chat_stream_with_tools(&agent, Uuid::new_v4(), "go", None)
        .await
        .unwrap();
    let events: Vec<ChatEvent> = stream.collect().await;

    match events.last() {
        Some(ChatEvent::Error { message }) => assert!(message.contains("provider melted")),
        other => panic!("expected terminal error event, got {:?}", other),
    }

    // Round one's messages survived the failure in round two.
    let messages = store.list_by_conversation(conv_id).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "tool"]);
}

#[tokio::test]
async fn test_conversation_history_reaches_provider() {
    // A second turn in the same conversation includes the first turn's
    // messages, in order, after the system prompt.
    struct HistoryProbe {
        seen: Mutex<Vec<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl LlmProvider for HistoryProbe {
        async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, PlatformError> {
            self.seen.lock().unwrap().push(
                request
                    .messages
                    .iter()
                    .map(|m| (m.role.as_str().to_string(), m.content.clone()))
                    .collect(),
            );
            Ok(LlmResponse {
                content: String::from("ok"),
                model: String::from("mock"),
                tool_calls: vec![],
                usage: None,
            })
        }

        async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream, PlatformError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    let probe = Arc::new(HistoryProbe {
        seen: Mutex::new(Vec::new()),
    });
    let executions = Arc::new(AtomicUsize::new(0));
    let (service, _) = service(probe.clone(), executions);
    let agent = agent_with_tools(&[]);
    let user_id = Uuid::new_v4();

    let (conv_id, _) = service.chat(&agent, user_id, "first", None).await.unwrap();
    service
        .chat(&agent, user_id, "second", Some(conv_id))
        .await
        .unwrap();

    let seen = probe.seen.lock().unwrap();
    let second_turn = &seen[1];
    let expected: Vec<(String, String)> = vec![
        (String::from("system"), String::from("You are a test agent.")),
        (String::from("user"), String::from("first")),
        (String::from("assistant"), String::from("ok")),
        (String::from("user"), String::from("second")),
    ];
    assert_eq!(second_turn, &expected);
}
