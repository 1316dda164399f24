//! Tool catalog.
//!
//! A [`Tool`] exposes a [`ToolDefinition`] (name, description, parameter
//! schema) and an async `execute`.  The process-wide [`ToolRegistry`] is
//! populated during startup, frozen, and shared as `Arc<ToolRegistry>` —
//! there is no global mutable registry and no late registration.
//!
//! Execution results are structured [`ToolResult`]s.  A tool that fails
//! produces a non-ok result, not an error: results are serialised into the
//! conversation and fed back to the LLM.
//!
//! # Example
//!
//! ```rust
//! use agentflow::agentflow::tools::{ToolRegistry, CalculatorTool};
//! use std::sync::Arc;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Arc::new(CalculatorTool::new()));
//! let registry = Arc::new(registry);
//! assert!(registry.is_registered("calculator"));
//! ```

pub mod calculator;
pub mod code;
pub mod executor;
pub mod invoke_agent;
pub mod web;

pub use calculator::CalculatorTool;
pub use code::CodeExecutionTool;
pub use executor::ToolExecutor;
pub use invoke_agent::InvokeAgentTool;
pub use web::{MockSearchProvider, SearchProvider, WebSearchTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// The output data from the tool.
    pub output: Value,
    /// Error message when execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Serialise for embedding in a conversation message.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "success": self.success,
            "output": self.output,
        });
        if let Some(error) = &self.error {
            value["error"] = json!(error);
        }
        value
    }
}

/// Type of a tool parameter, mirrored into the JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// A single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Define a required parameter with the provided name and type.
    pub fn new(
        name: impl Into<String>,
        param_type: ToolParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            enum_values: None,
            default: None,
        }
    }

    /// Mark the parameter as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Restrict the parameter to an enumerated set of strings.
    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Provide a default used when the LLM omits the parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static description of a tool: identity plus parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition (builder pattern).
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render the parameters as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = json!({
                "type": param.param_type.schema_name(),
                "description": param.description,
            });
            if let Some(values) = &param.enum_values {
                prop["enum"] = json!(values);
            }
            if let Some(default) = &param.default {
                prop["default"] = default.clone();
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(param.name.clone());
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON arguments failed validation or deserialization.
    InvalidArguments(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Unknown tool: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Execution error: {}", msg),
            ToolError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// A callable capability, registered by name and selectable by agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static definition surfaced to the LLM.
    fn definition(&self) -> ToolDefinition;

    /// Execute with JSON arguments.
    ///
    /// Application-level failures should be returned as non-ok
    /// [`ToolResult`]s; `Err` is reserved for argument validation and
    /// infrastructure faults, which the executor folds into non-ok results
    /// anyway.
    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError>;
}

/// Process-wide catalog of tools, frozen after startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Later registrations of the same name win.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// Borrow a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names.
    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Definitions for the named tools, skipping names that are not
    /// registered.  Unknown names are the caller's problem at dispatch
    /// time, not here.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }
}
