//! Domain entities.
//!
//! Entities reference each other by id only; the object graph of the
//! persistence layer never leaks into the domain.  All timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A user-owned agent: a system prompt, a model identifier, and a tool
/// allow-list.  Tool names are resolved against the registry at dispatch
/// time; unknown names surface as failures there, never as a crash here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub llm_model: String,
    pub tools: Vec<String>,
    pub a2a_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent with the mandatory fields; the rest default.
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        llm_model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: None,
            system_prompt: system_prompt.into(),
            llm_model: llm_model.into(),
            tools: Vec::new(),
            a2a_enabled: false,
            created_at: Utc::now(),
        }
    }

    /// Set the tool allow-list (builder pattern).
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Enable the A2A surface for this agent (builder pattern).
    pub fn with_a2a_enabled(mut self, enabled: bool) -> Self {
        self.a2a_enabled = enabled;
        self
    }
}

/// A chat session between a user and an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(agent_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            user_id,
            title: None,
            created_at: Utc::now(),
        }
    }
}

/// A single persisted chat message.
///
/// `tool_call_id` correlates a `tool`-role message with the assistant tool
/// call it answers; `tool_calls` carries the structured call attachment on
/// assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(conversation_id: Uuid, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Value) -> Self {
        self.tool_calls = Some(calls);
        self
    }
}

/// A workflow node.  The `node_type` tag selects the behavior; `data` holds
/// the type-specific payload, validated by the engine per type at dispatch
/// time.  Unknown tags are passed through, not rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data,
        }
    }
}

/// A dependency edge: `target` depends on `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
        }
    }
}

/// A user-owned workflow: nodes + edges that must form a DAG at execute
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub is_active: bool,
}

impl Workflow {
    pub fn new(user_id: Uuid, name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            nodes,
            edges,
            is_active: true,
        }
    }
}

/// Lifecycle states of a workflow execution.  Terminal states are
/// immutable; the engine never re-enters a finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Outcome of a single node within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunRecord {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRunRecord {
    pub fn completed(result: Value) -> Self {
        Self {
            status: String::from("completed"),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: String::from("failed"),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// One run of a workflow.  Created `pending`, transitions through
/// `running` to `completed` or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger_data: Value,
    pub node_results: HashMap<String, NodeRunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: Uuid, trigger_data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            trigger_data,
            node_results: HashMap::new(),
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A cron-driven trigger.  The expression is 5-field POSIX, interpreted in
/// `timezone`; stored instants are UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduleTrigger {
    pub fn new(workflow_id: Uuid, cron_expression: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            cron_expression: cron_expression.into(),
            timezone: String::from("UTC"),
            is_active: true,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

/// An HMAC-protected inbound trigger.  `webhook_path` is globally unique
/// among active triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub webhook_path: String,
    pub secret: Option<String>,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl WebhookTrigger {
    pub fn new(workflow_id: Uuid, webhook_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            webhook_path: webhook_path.into(),
            secret: None,
            is_active: true,
            last_triggered_at: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// A stored API credential.  Only the SHA-256 of the raw key is persisted;
/// `key_prefix` exists for display.  The raw key is returned exactly once,
/// at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub rate_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_deserializes_with_defaults() {
        let node: Node = serde_json::from_value(json!({"id": "a"})).unwrap();
        assert_eq!(node.id, "a");
        assert_eq!(node.node_type, "");
        assert!(node.data.is_object());
    }

    #[test]
    fn test_execution_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Completed).unwrap(),
            json!("completed")
        );
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Failed).unwrap(),
            json!("failed")
        );
    }

    #[test]
    fn test_node_run_record_omits_empty_fields() {
        let record = NodeRunRecord::completed(json!({"x": 1}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "completed");
        assert!(value.get("error").is_none());
    }
}
