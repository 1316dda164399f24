//! Code execution tool.
//!
//! Runs short Python or JavaScript snippets in a subprocess with a hard
//! wall-clock timeout and capped output.  Stronger isolation (containers,
//! seccomp) belongs to the deployment, not to this tool.

use crate::agentflow::tools::{
    Tool, ToolDefinition, ToolError, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Interpreter table: language tag to (binary, eval flag).
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("python", "python3", "-c"),
    ("javascript", "node", "-e"),
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Subprocess-backed code execution.
pub struct CodeExecutionTool {
    timeout: Duration,
}

impl CodeExecutionTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the execution timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
        LANGUAGES
            .iter()
            .find(|(tag, _, _)| *tag == language)
            .map(|(_, bin, flag)| (*bin, *flag))
    }
}

impl Default for CodeExecutionTool {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        text.into_owned()
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n... [output truncated]", &text[..end])
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "execute_code",
            "Execute a code snippet and return its stdout, stderr, and exit \
             code. Supported languages: python, javascript.",
        )
        .with_parameter(
            ToolParameter::new(
                "language",
                ToolParameterType::String,
                "Language of the snippet",
            )
            .with_enum(vec![String::from("python"), String::from("javascript")]),
        )
        .with_parameter(ToolParameter::new(
            "code",
            ToolParameterType::String,
            "The code to execute",
        ))
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let language = args
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("python");
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments(String::from("code is required")))?;

        let (binary, flag) = match Self::interpreter(language) {
            Some(pair) => pair,
            None => {
                return Ok(ToolResult::failure(format!(
                    "Unsupported language: {}",
                    language
                )))
            }
        };

        log::info!("execute_code: {} ({} bytes)", language, code.len());

        let child = Command::new(binary)
            .arg(flag)
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Failed to start {}: {}",
                    binary, e
                )))
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(ToolResult::failure(format!("Execution error: {}", e))),
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "Code execution timed out after {} seconds",
                    self.timeout.as_secs()
                )))
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(ToolResult {
            success: output.status.success(),
            output: json!({
                "language": language,
                "stdout": truncate_output(&output.stdout),
                "stderr": truncate_output(&output.stderr),
                "exit_code": exit_code,
            }),
            error: if output.status.success() {
                None
            } else {
                Some(format!("Process exited with code {}", exit_code))
            },
        })
    }
}
