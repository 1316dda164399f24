//! A2A task types and message helpers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// System user id under which A2A-originated conversations run.
pub const A2A_SYSTEM_USER_ID: Uuid = Uuid::from_u128(2);

/// Lifecycle states of an A2A task.
///
/// `pending → running → {completed, failed, cancelled}`; `completed` and
/// `failed` are terminal and cannot be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum A2ATaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl A2ATaskStatus {
    /// Terminal states cannot be cancelled; a cancel request is a no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self, A2ATaskStatus::Completed | A2ATaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            A2ATaskStatus::Pending => "pending",
            A2ATaskStatus::Running => "running",
            A2ATaskStatus::Completed => "completed",
            A2ATaskStatus::Failed => "failed",
            A2ATaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Mapping between an A2A task and the internal conversation serving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2ATaskContext {
    pub task_id: String,
    pub agent_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub status: A2ATaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl A2ATaskContext {
    pub fn new(task_id: impl Into<String>, agent_id: Uuid) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id,
            conversation_id: None,
            status: A2ATaskStatus::Pending,
            result: None,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn with_status(mut self, status: A2ATaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Extract the text content from an A2A message object.
///
/// Parts may be `{type: "text", text}` objects or bare strings; other
/// part kinds are skipped.
pub fn extract_text_from_message(message: &Value) -> String {
    let mut parts_text = Vec::new();

    if let Some(parts) = message.get("parts").and_then(|v| v.as_array()) {
        for part in parts {
            match part {
                Value::Object(obj) => {
                    let is_text = obj.get("type").and_then(|v| v.as_str()) == Some("text")
                        || obj.contains_key("text");
                    if is_text {
                        if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
                            parts_text.push(text.to_string());
                        }
                    }
                }
                Value::String(s) => parts_text.push(s.clone()),
                _ => {}
            }
        }
    }

    parts_text.join(" ").trim().to_string()
}

/// Extract the agent's reply text from a task response payload.
pub fn extract_text_from_task_result(task: &Value) -> String {
    task.get("result")
        .and_then(|r| r.get("message"))
        .map(extract_text_from_message)
        .unwrap_or_default()
}

/// Build the standard task result payload around a reply text.
pub fn task_result_message(text: &str) -> Value {
    json!({
        "message": {
            "role": "agent",
            "parts": [{"type": "text", "text": text}],
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(A2ATaskStatus::Completed.is_terminal());
        assert!(A2ATaskStatus::Failed.is_terminal());
        assert!(!A2ATaskStatus::Cancelled.is_terminal());
        assert!(!A2ATaskStatus::Running.is_terminal());
        assert!(!A2ATaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_extract_text_variants() {
        let message = json!({
            "role": "user",
            "parts": [
                {"type": "text", "text": "hello"},
                "world",
                {"type": "image", "url": "x"},
                {"text": "again"},
            ]
        });
        assert_eq!(extract_text_from_message(&message), "hello world again");
    }

    #[test]
    fn test_extract_text_from_task_result() {
        let task = json!({
            "id": "t1",
            "status": "completed",
            "result": task_result_message("the answer"),
        });
        assert_eq!(extract_text_from_task_result(&task), "the answer");
    }

    #[test]
    fn test_empty_message_extracts_empty() {
        assert_eq!(extract_text_from_message(&json!({"parts": []})), "");
        assert_eq!(extract_text_from_message(&json!({})), "");
    }
}
