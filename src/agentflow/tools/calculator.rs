//! Calculator tool.
//!
//! Evaluates arithmetic expressions with `evalexpr`.  The `pi` and `e`
//! constants and a `**` power alias are provided on top of evalexpr's
//! builtin `math::` functions.

use crate::agentflow::tools::{
    Tool, ToolDefinition, ToolError, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use evalexpr::ContextWithMutableVariables;
use serde_json::{json, Value};

pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(expression: &str) -> Result<f64, String> {
        let prepared = expression.trim().replace("**", "^");

        let mut context: evalexpr::HashMapContext = evalexpr::HashMapContext::new();
        let _ = context.set_value(
            "pi".to_string(),
            evalexpr::Value::Float(std::f64::consts::PI),
        );
        let _ = context.set_value(
            "e".to_string(),
            evalexpr::Value::Float(std::f64::consts::E),
        );

        match evalexpr::eval_with_context(&prepared, &context) {
            Ok(value) => value
                .as_number()
                .map_err(|_| String::from("Result is not a number")),
            Err(e) => Err(format!("Evaluation error: {}", e)),
        }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "calculator",
            "Evaluate a mathematical expression and return the numeric result.",
        )
        .with_parameter(ToolParameter::new(
            "expression",
            ToolParameterType::String,
            "Expression to evaluate, e.g. '2 + 2 * 3'",
        ))
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments(String::from("expression is required")))?;

        match Self::evaluate(expression) {
            Ok(result) => Ok(ToolResult::success(json!({
                "expression": expression,
                "result": result,
            }))),
            Err(e) => Ok(ToolResult::failure(e)),
        }
    }
}
