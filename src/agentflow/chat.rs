//! Chat service: the agent tool-use loop.
//!
//! Drives one agent turn: inject history, call the LLM, dispatch any tool
//! calls it emits, feed the results back, and repeat — bounded by
//! [`MAX_TOOL_ITERATIONS`] so the loop terminates regardless of model
//! behavior.  Both a request/response form ([`ChatService::chat`]) and a
//! streaming form ([`ChatService::chat_stream_with_tools`]) are provided.
//!
//! Durability is intentional and partial: every message is persisted the
//! moment it exists, so an error mid-turn leaves the conversation with
//! everything up to that point.
//!
//! # Stream grammar
//!
//! ```text
//! Start { conversation_id }
//!   └─ zero or more (ToolCall → ToolResult) pairs, causally ordered
//!   └─ zero or more Content { text } (only on the terminating iteration)
//! Done | Error { message }
//! ```
//!
//! Every `ToolCall` has exactly one matching `ToolResult` with the same id,
//! emitted after it; `Content` never precedes an unresolved `ToolCall`.

use crate::agentflow::error::PlatformError;
use crate::agentflow::llm::{
    to_provider_tools, ChatMessage, ChatRequest, LlmProvider, MessageRole,
};
use crate::agentflow::models::{Agent, Conversation, StoredMessage};
use crate::agentflow::repository::{ConversationRepository, MessageRepository};
use crate::agentflow::tools::{ToolExecutor, ToolRegistry};
use futures_util::stream::Stream;
use serde::Serialize;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Upper bound on LLM round-trips within one turn.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// The interface the chat loop needs from an agent.
///
/// Both the full [`Agent`] entity and any stripped-down adapter implement
/// this; the loop never probes for attributes at runtime.
pub trait AgentProfile: Send + Sync {
    fn id(&self) -> Uuid;
    fn system_prompt(&self) -> &str;
    fn model(&self) -> &str;
    fn tool_names(&self) -> &[String];
}

impl AgentProfile for Agent {
    fn id(&self) -> Uuid {
        self.id
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn model(&self) -> &str {
        &self.llm_model
    }

    fn tool_names(&self) -> &[String] {
        &self.tools
    }
}

/// Typed events emitted by the streaming chat form.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Start {
        conversation_id: Uuid,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        success: bool,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Content {
        text: String,
    },
    Done,
    Error {
        message: String,
    },
}

/// A finite stream of [`ChatEvent`]s, ending with `Done` or `Error`.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Service driving agent turns.  Cloning is cheap: the clone shares the
/// provider, repositories, and registry.
#[derive(Clone)]
pub struct ChatService {
    llm: Arc<dyn LlmProvider>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
    max_tool_calls: u32,
    tool_timeout: Duration,
}

impl ChatService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            llm,
            conversations,
            messages,
            registry,
            max_iterations: MAX_TOOL_ITERATIONS,
            max_tool_calls: crate::agentflow::tools::executor::MAX_TOOL_CALLS_PER_TURN,
            tool_timeout: crate::agentflow::tools::executor::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-turn limits (builder pattern).
    pub fn with_limits(mut self, max_iterations: usize, max_tool_calls: u32) -> Self {
        self.max_iterations = max_iterations;
        self.max_tool_calls = max_tool_calls;
        self
    }

    /// Override the per-tool-call timeout (builder pattern).
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    async fn resolve_conversation(
        &self,
        agent: &dyn AgentProfile,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
    ) -> Result<Uuid, PlatformError> {
        if let Some(id) = conversation_id {
            if let Some(existing) = self.conversations.get(id).await? {
                return Ok(existing.id);
            }
        }
        let conversation = Conversation::new(agent.id(), user_id);
        let id = conversation.id;
        self.conversations.create(&conversation).await?;
        Ok(id)
    }

    /// Build the outbound message list: system prompt, then the full
    /// history in creation order, then the new user message.
    async fn build_messages(
        &self,
        agent: &dyn AgentProfile,
        conversation_id: Uuid,
        user_message: &str,
    ) -> Result<Vec<ChatMessage>, PlatformError> {
        let mut messages = Vec::new();
        messages.push(ChatMessage::new(
            MessageRole::System,
            agent.system_prompt(),
        ));

        for stored in self.messages.list_by_conversation(conversation_id).await? {
            let role = match stored.role.as_str() {
                "system" => MessageRole::System,
                "assistant" => MessageRole::Assistant,
                "tool" => MessageRole::Tool,
                _ => MessageRole::User,
            };
            let mut message = ChatMessage::new(role, stored.content);
            message.tool_call_id = stored.tool_call_id;
            messages.push(message);
        }

        messages.push(ChatMessage::new(MessageRole::User, user_message));
        Ok(messages)
    }

    fn provider_tools(&self, agent: &dyn AgentProfile) -> Option<Vec<Value>> {
        let definitions = self.registry.definitions_for(agent.tool_names());
        if definitions.is_empty() {
            None
        } else {
            Some(to_provider_tools(&definitions))
        }
    }

    fn executor(&self) -> ToolExecutor {
        ToolExecutor::new(Arc::clone(&self.registry))
            .with_timeout(self.tool_timeout)
            .with_max_calls(self.max_tool_calls)
    }

    /// Persist the assistant's tool-call marker and the tool result, and
    /// append both to the outbound message list.
    async fn record_tool_round(
        &self,
        conversation_id: Uuid,
        messages: &mut Vec<ChatMessage>,
        call_id: &str,
        tool_name: &str,
        arguments: &Value,
        result_json: String,
    ) -> Result<(), PlatformError> {
        let marker = format!("Calling tool: {}", tool_name);

        messages.push(ChatMessage::new(MessageRole::Assistant, marker.clone()));
        messages.push(ChatMessage::tool_result(call_id, result_json.clone()));

        self.messages
            .append(
                &StoredMessage::new(conversation_id, "assistant", marker).with_tool_calls(json!({
                    "tool_call_id": call_id,
                    "name": tool_name,
                    "arguments": arguments,
                })),
            )
            .await?;
        self.messages
            .append(
                &StoredMessage::new(conversation_id, "tool", result_json)
                    .with_tool_call_id(call_id),
            )
            .await?;
        Ok(())
    }

    /// Handle a chat message, returning the final assistant content.
    ///
    /// Runs the tool loop to completion: at most
    /// [`MAX_TOOL_ITERATIONS`] LLM calls, every tool call dispatched
    /// through the executor with its result fed back into the
    /// conversation.
    pub async fn chat(
        &self,
        agent: &dyn AgentProfile,
        user_id: Uuid,
        user_message: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<(Uuid, String), PlatformError> {
        let conv_id = self
            .resolve_conversation(agent, user_id, conversation_id)
            .await?;

        let mut messages = self.build_messages(agent, conv_id, user_message).await?;
        self.messages
            .append(&StoredMessage::new(conv_id, "user", user_message))
            .await?;

        let tools = self.provider_tools(agent);
        let executor = self.executor();
        executor.reset_call_count();

        let mut iteration = 0;
        let mut last_content = String::new();
        while iteration < self.max_iterations {
            iteration += 1;

            let response = self
                .llm
                .chat_with_tools(
                    ChatRequest::new(messages.clone(), agent.model()).with_tools(tools.clone()),
                )
                .await?;
            last_content = response.content.clone();

            if !response.has_tool_calls() {
                break;
            }

            for tc in &response.tool_calls {
                let result = executor.execute(&tc.name, tc.arguments.clone(), None).await;
                self.record_tool_round(
                    conv_id,
                    &mut messages,
                    &tc.id,
                    &tc.name,
                    &tc.arguments,
                    result.to_value().to_string(),
                )
                .await?;
            }
        }

        if !last_content.is_empty() {
            self.messages
                .append(&StoredMessage::new(conv_id, "assistant", last_content.clone()))
                .await?;
        }

        Ok((conv_id, last_content))
    }

    /// Handle a chat message as a stream of typed events.
    ///
    /// The conversation is resolved and the user message persisted before
    /// this returns; the loop itself runs on a background task feeding the
    /// returned stream.  The stream always terminates with `Done` or
    /// `Error`.
    pub async fn chat_stream_with_tools(
        &self,
        agent: &dyn AgentProfile,
        user_id: Uuid,
        user_message: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<(Uuid, ChatEventStream), PlatformError> {
        let conv_id = self
            .resolve_conversation(agent, user_id, conversation_id)
            .await?;

        let mut messages = self.build_messages(agent, conv_id, user_message).await?;
        self.messages
            .append(&StoredMessage::new(conv_id, "user", user_message))
            .await?;

        let tools = self.provider_tools(agent);
        let model = agent.model().to_string();

        let service = self.clone();
        let (tx, rx) = mpsc::channel::<ChatEvent>(32);

        tokio::spawn(async move {
            let _ = tx
                .send(ChatEvent::Start {
                    conversation_id: conv_id,
                })
                .await;

            let executor = service.executor();
            executor.reset_call_count();

            let mut iteration = 0;
            while iteration < service.max_iterations {
                iteration += 1;

                let response = match service
                    .llm
                    .chat_with_tools(
                        ChatRequest::new(messages.clone(), &model).with_tools(tools.clone()),
                    )
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        log::error!("chat stream failed at iteration {}: {}", iteration, e);
                        let _ = tx
                            .send(ChatEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };

                if response.has_tool_calls() {
                    for tc in &response.tool_calls {
                        let _ = tx
                            .send(ChatEvent::ToolCall {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            })
                            .await;

                        let result = executor.execute(&tc.name, tc.arguments.clone(), None).await;

                        let _ = tx
                            .send(ChatEvent::ToolResult {
                                id: tc.id.clone(),
                                success: result.success,
                                output: result.output.clone(),
                                error: result.error.clone(),
                            })
                            .await;

                        if let Err(e) = service
                            .record_tool_round(
                                conv_id,
                                &mut messages,
                                &tc.id,
                                &tc.name,
                                &tc.arguments,
                                result.to_value().to_string(),
                            )
                            .await
                        {
                            let _ = tx
                                .send(ChatEvent::Error {
                                    message: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    }
                    continue;
                }

                // Terminating iteration: no tool calls.
                if !response.content.is_empty() {
                    let _ = tx
                        .send(ChatEvent::Content {
                            text: response.content.clone(),
                        })
                        .await;
                    if let Err(e) = service
                        .messages
                        .append(&StoredMessage::new(conv_id, "assistant", response.content))
                        .await
                    {
                        let _ = tx
                            .send(ChatEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }

                let _ = tx.send(ChatEvent::Done).await;
                return;
            }

            // Iteration budget exhausted with the model still requesting
            // tools; the stream terminates cleanly regardless.
            let _ = tx.send(ChatEvent::Done).await;
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok((conv_id, Box::pin(stream)))
    }
}
