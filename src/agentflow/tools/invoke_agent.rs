//! Agent invocation tool.
//!
//! Lets an agent dispatch a sub-task to another agent over the A2A
//! protocol.  The target's card is fetched first to confirm it exists;
//! a card fetch failure other than not-found degrades to a warning.

use crate::agentflow::a2a::client::A2AClient;
use crate::agentflow::a2a::types::extract_text_from_task_result;
use crate::agentflow::error::PlatformError;
use crate::agentflow::tools::{
    Tool, ToolDefinition, ToolError, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct InvokeAgentTool {
    client: Arc<A2AClient>,
}

impl InvokeAgentTool {
    pub fn new(client: Arc<A2AClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for InvokeAgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "invoke_agent",
            "Delegate a task to another AI agent. Sends the message to the \
             agent at the given URL over the A2A protocol and returns its \
             response.",
        )
        .with_parameter(ToolParameter::new(
            "agent_url",
            ToolParameterType::String,
            "Base URL of the target agent, e.g. http://host/a2a/agents/{id}",
        ))
        .with_parameter(ToolParameter::new(
            "message",
            ToolParameterType::String,
            "Message or task description to send to the agent",
        ))
        .with_parameter(
            ToolParameter::new(
                "wait_for_completion",
                ToolParameterType::Boolean,
                "When false, return only the task id without waiting",
            )
            .optional()
            .with_default(json!(true)),
        )
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let agent_url = args
            .get("agent_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments(String::from("agent_url is required")))?;
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments(String::from("message is required")))?;
        let wait_for_completion = args
            .get("wait_for_completion")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let agent_name = match self.client.get_agent_card(agent_url).await {
            Ok(card) => card
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown Agent")
                .to_string(),
            Err(PlatformError::NotFound(_)) => {
                return Ok(ToolResult::failure(format!(
                    "Agent not found at {}",
                    agent_url
                )));
            }
            Err(e) => {
                log::warn!("could not fetch agent card: {}", e);
                String::from("Unknown Agent")
            }
        };

        log::info!("invoking agent: {} at {}", agent_name, agent_url);

        let task = match self.client.send_task(agent_url, message, None).await {
            Ok(task) => task,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let task_id = task.get("id").cloned().unwrap_or(Value::Null);
        let status = task
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        if !wait_for_completion {
            return Ok(ToolResult::success(json!({
                "agent_name": agent_name,
                "task_id": task_id,
                "status": status,
            })));
        }

        match status {
            "completed" => Ok(ToolResult::success(json!({
                "agent_name": agent_name,
                "task_id": task_id,
                "status": status,
                "response": extract_text_from_task_result(&task),
            }))),
            "failed" => Ok(ToolResult::failure(format!(
                "Agent task failed: {}",
                task.get("error").and_then(|v| v.as_str()).unwrap_or("unknown")
            ))),
            other => Ok(ToolResult::success(json!({
                "agent_name": agent_name,
                "task_id": task_id,
                "status": other,
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_arguments() {
        let tool = InvokeAgentTool::new(Arc::new(A2AClient::new()));
        let err = tool.execute(json!({"message": "hi"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = tool
            .execute(json!({"agent_url": "http://x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
