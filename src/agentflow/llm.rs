//! LLM provider adapter.
//!
//! One [`LlmProvider`] trait abstracts over heterogeneous chat back-ends.
//! The platform depends only on the trait; [`OpenAiProvider`] is the
//! concrete adapter for OpenAI-compatible chat-completions APIs.
//!
//! Response contract: `tool_calls` is a possibly-empty ordered sequence of
//! `{id, name, arguments}`.  Provider argument payloads that fail to parse
//! as JSON are surfaced as `{"raw": <string>}` rather than aborting the
//! call.

use crate::agentflow::error::PlatformError;
use crate::agentflow::tools::ToolDefinition;
use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;

/// Message roles understood by chat back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// A single chat message in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Correlates a tool-result message with its originating call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Build a tool-result message correlated to `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Uniform chat response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat request in provider-neutral form.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tools: Option<Vec<Value>>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools: None,
        }
    }

    pub fn with_tools(mut self, tools: Option<Vec<Value>>) -> Self {
        self.tools = tools;
        self
    }
}

/// A finite stream of content chunks.  Completes when the upstream closes;
/// not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, PlatformError>> + Send>>;

/// Uniform chat interface over heterogeneous LLM back-ends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Full request/response chat completion.
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, PlatformError>;

    /// Streaming chat completion yielding content deltas.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, PlatformError>;

    /// Same as [`chat`](LlmProvider::chat), named for callers that intend
    /// to run a tool loop over the response.
    async fn chat_with_tools(&self, request: ChatRequest) -> Result<LlmResponse, PlatformError> {
        self.chat(request).await
    }
}

/// Convert tool definitions to the OpenAI-style `tools` array, the format
/// most widely accepted across providers.
pub fn to_provider_tools(definitions: &[ToolDefinition]) -> Vec<Value> {
    definitions
        .iter()
        .map(|d| {
            json!({
                "type": "function",
                "function": {
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.to_json_schema(),
                },
            })
        })
        .collect()
}

/// Adapter for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut message = json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                });
                if let Some(id) = &m.tool_call_id {
                    message["tool_call_id"] = json!(id);
                }
                message
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools);
            }
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Parse the provider's tool_calls payload into the uniform shape.
    fn parse_tool_calls(message: &Value) -> Vec<ToolCallRequest> {
        let mut calls = Vec::new();
        if let Some(raw_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            for raw in raw_calls {
                let id = raw
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let function = raw.get("function").cloned().unwrap_or(Value::Null);
                let name = function
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = match function.get("arguments").and_then(|v| v.as_str()) {
                    Some(text) => {
                        serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
                    }
                    None => json!({}),
                };
                calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments,
                });
            }
        }
        calls
    }

    fn parse_usage(body: &Value) -> Option<TokenUsage> {
        let usage = body.get("usage")?;
        Some(TokenUsage {
            input_tokens: usage.get("prompt_tokens")?.as_u64()? as usize,
            output_tokens: usage.get("completion_tokens")?.as_u64()? as usize,
            total_tokens: usage.get("total_tokens")?.as_u64()? as usize,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, PlatformError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PlatformError::Upstream(format!(
                "LLM provider returned {}: {}",
                status, text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Upstream(e.to_string()))?;

        let message = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .unwrap_or(Value::Null);

        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(LlmResponse {
            content,
            model: payload
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(&request.model)
                .to_string(),
            tool_calls: Self::parse_tool_calls(&message),
            usage: Self::parse_usage(&payload),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, PlatformError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(PlatformError::Upstream(format!(
                "LLM provider returned {}",
                status
            )));
        }

        // Decode SSE frames: each "data: {...}" line carries a delta; the
        // "[DONE]" sentinel closes the stream.
        let byte_stream = response.bytes_stream();
        let stream = futures_util::stream::unfold(
            (byte_stream, String::new()),
            |(mut bytes, mut buffer)| async move {
                loop {
                    if let Some(newline) = buffer.find('\n') {
                        let line = buffer[..newline].trim().to_string();
                        buffer.drain(..=newline);
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data == "[DONE]" {
                            return None;
                        }
                        if let Ok(frame) = serde_json::from_str::<Value>(data) {
                            if let Some(delta) = frame
                                .get("choices")
                                .and_then(|c| c.get(0))
                                .and_then(|c| c.get("delta"))
                                .and_then(|d| d.get("content"))
                                .and_then(|v| v.as_str())
                            {
                                if !delta.is_empty() {
                                    return Some((Ok(delta.to_string()), (bytes, buffer)));
                                }
                            }
                        }
                        continue;
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(PlatformError::Upstream(e.to_string())),
                                (bytes, buffer),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
