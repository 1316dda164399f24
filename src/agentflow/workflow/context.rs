//! Workflow execution context.
//!
//! Carries the trigger payload and each completed node's result between
//! nodes.  Templates and transform nodes see the context as one JSON
//! object: `{"trigger": <trigger_data>, "<node_id>": <result>, ...}`.

use serde_json::{Map, Value};

/// Per-execution context object.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    trigger_data: Value,
    results: Map<String, Value>,
}

impl WorkflowContext {
    /// Create a context with the inbound trigger payload.  `None` and
    /// non-object payloads degrade to an empty object.
    pub fn new(trigger_data: Option<Value>) -> Self {
        let trigger_data = match trigger_data {
            Some(value @ Value::Object(_)) => value,
            _ => Value::Object(Map::new()),
        };
        Self {
            trigger_data,
            results: Map::new(),
        }
    }

    /// The inbound trigger payload.
    pub fn trigger_data(&self) -> &Value {
        &self.trigger_data
    }

    /// Store a node's result.
    pub fn set_result(&mut self, node_id: &str, result: Value) {
        self.results.insert(node_id.to_string(), result);
    }

    /// Fetch a node's result, if that node has completed.
    pub fn get_result(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id)
    }

    /// The whole context as one JSON object, for template resolution.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(String::from("trigger"), self.trigger_data.clone());
        for (key, value) in &self.results {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}
