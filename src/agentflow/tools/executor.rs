//! Tool execution engine.
//!
//! Dispatches tool calls against the registry with a per-turn call budget
//! and a wall-clock timeout per call.  All failure modes — over-limit,
//! unknown tool, timeout, invalid arguments, execution fault — are folded
//! into non-ok [`ToolResult`]s; the executor itself never errors, because
//! tool outcomes are conversation data, not control flow.

use crate::agentflow::tools::{Tool, ToolError, ToolRegistry, ToolResult};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default cap on tool calls within one chat turn.
pub const MAX_TOOL_CALLS_PER_TURN: u32 = 5;

/// Default timeout for a single tool execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-turn tool executor.
///
/// The call counter is turn-local: the chat loop resets it at the start of
/// each turn via [`ToolExecutor::reset_call_count`].
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    max_calls: u32,
    call_count: AtomicU32,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_TIMEOUT,
            max_calls: MAX_TOOL_CALLS_PER_TURN,
            call_count: AtomicU32::new(0),
        }
    }

    /// Override the default per-call timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the per-turn call cap (builder pattern).
    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = max_calls;
        self
    }

    /// Reset the call counter for a new turn.
    pub fn reset_call_count(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// Number of tool calls made this turn.
    pub fn calls_made(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of tool calls remaining this turn.
    pub fn calls_remaining(&self) -> u32 {
        self.max_calls
            .saturating_sub(self.call_count.load(Ordering::SeqCst))
    }

    /// Execute a single tool.
    ///
    /// Checks the per-turn budget, resolves the tool, and runs it under the
    /// effective timeout.  Every failure path returns a non-ok result.
    pub async fn execute(&self, tool_name: &str, args: Value, timeout: Option<Duration>) -> ToolResult {
        if self.call_count.load(Ordering::SeqCst) >= self.max_calls {
            log::warn!("tool call limit reached ({})", self.max_calls);
            return ToolResult::failure(format!(
                "Tool call limit reached ({} calls per turn)",
                self.max_calls
            ));
        }

        let tool = match self.registry.get(tool_name) {
            Some(tool) => Arc::clone(tool),
            None => {
                log::error!("unknown tool: {}", tool_name);
                return ToolResult::failure(format!("Unknown tool: {}", tool_name));
            }
        };

        let effective_timeout = timeout.unwrap_or(self.default_timeout);
        self.call_count.fetch_add(1, Ordering::SeqCst);
        log::info!("executing tool: {}", tool_name);

        match tokio::time::timeout(effective_timeout, tool.execute(args)).await {
            Ok(Ok(result)) => {
                log::info!("tool {} completed: success={}", tool_name, result.success);
                result
            }
            Ok(Err(ToolError::InvalidArguments(msg))) => {
                log::error!("tool {} invalid arguments: {}", tool_name, msg);
                ToolResult::failure(format!("Invalid arguments: {}", msg))
            }
            Ok(Err(e)) => {
                log::error!("tool {} execution failed: {}", tool_name, e);
                ToolResult::failure(format!("Execution error: {}", e))
            }
            Err(_) => {
                log::error!(
                    "tool {} timed out after {}s",
                    tool_name,
                    effective_timeout.as_secs()
                );
                ToolResult::failure(format!(
                    "Tool execution timed out after {} seconds",
                    effective_timeout.as_secs()
                ))
            }
        }
    }

    /// Execute multiple tools concurrently.
    ///
    /// When more calls are requested than the remaining budget allows, the
    /// first `remaining` run concurrently and the overflow receives
    /// over-limit failures at the matching index positions.  Result order
    /// always matches request order.
    pub async fn execute_parallel(
        &self,
        calls: Vec<(String, Value)>,
        timeout: Option<Duration>,
    ) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let remaining = self.calls_remaining() as usize;
        if calls.len() > remaining {
            log::warn!(
                "too many tool calls: {} requested, {} remaining",
                calls.len(),
                remaining
            );
            let mut iter = calls.into_iter();
            let executable: Vec<_> = iter.by_ref().take(remaining).collect();
            let overflow: Vec<_> = iter.collect();

            let mut results = self.execute_batch(executable, timeout).await;
            for (tool_name, _) in overflow {
                results.push(ToolResult::failure(format!(
                    "Tool call limit reached, {} not executed",
                    tool_name
                )));
            }
            return results;
        }

        self.execute_batch(calls, timeout).await
    }

    async fn execute_batch(
        &self,
        calls: Vec<(String, Value)>,
        timeout: Option<Duration>,
    ) -> Vec<ToolResult> {
        let futures = calls
            .into_iter()
            .map(|(tool_name, args)| async move { self.execute(&tool_name, args, timeout).await });
        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::tools::{ToolDefinition, ToolError};
    use async_trait::async_trait;
    use serde_json::json;

    struct OkTool;

    #[async_trait]
    impl Tool for OkTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("ok", "Always succeeds")
        }

        async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(args))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("slow", "Sleeps for a long time")
        }

        async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::success(Value::Null))
        }
    }

    struct PickyTool;

    #[async_trait]
    impl Tool for PickyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("picky", "Requires a string argument")
        }

        async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(|s| ToolResult::success(json!(s)))
                .ok_or_else(|| {
                    ToolError::InvalidArguments(String::from("text must be a string"))
                })
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(OkTool));
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(PickyTool));
        ToolExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_call_limit_enforced() {
        let executor = executor();
        for _ in 0..MAX_TOOL_CALLS_PER_TURN {
            let result = executor.execute("ok", json!({}), None).await;
            assert!(result.success);
        }
        let over = executor.execute("ok", json!({}), None).await;
        assert!(!over.success);
        assert!(over.error.unwrap().contains("limit"));
        assert_eq!(executor.calls_made(), MAX_TOOL_CALLS_PER_TURN);
    }

    #[tokio::test]
    async fn test_reset_restores_budget() {
        let executor = executor();
        for _ in 0..MAX_TOOL_CALLS_PER_TURN {
            executor.execute("ok", json!({}), None).await;
        }
        executor.reset_call_count();
        assert_eq!(executor.calls_remaining(), MAX_TOOL_CALLS_PER_TURN);
        assert!(executor.execute("ok", json!({}), None).await.success);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_result_not_panic() {
        let executor = executor();
        let result = executor.execute("nope", json!({}), None).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Unknown tool: nope");
        // The failed lookup did not consume budget.
        assert_eq!(executor.calls_made(), 0);
    }

    #[tokio::test]
    async fn test_timeout_returns_failure() {
        let executor = executor();
        let result = executor
            .execute("slow", json!({}), Some(Duration::from_millis(20)))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_contained() {
        let executor = executor();
        let result = executor.execute("picky", json!({"text": 7}), None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_parallel_overflow_keeps_order() {
        let executor = executor();
        // Burn 3 of the 5 budget slots.
        for _ in 0..3 {
            executor.execute("ok", json!({}), None).await;
        }

        let calls = vec![
            (String::from("ok"), json!({"i": 0})),
            (String::from("ok"), json!({"i": 1})),
            (String::from("ok"), json!({"i": 2})),
            (String::from("ok"), json!({"i": 3})),
        ];
        let results = executor.execute_parallel(calls, None).await;

        assert_eq!(results.len(), 4);
        assert!(results[0].success);
        assert!(results[1].success);
        assert!(!results[2].success);
        assert!(!results[3].success);
        assert_eq!(results[0].output["i"], 0);
        assert_eq!(results[1].output["i"], 1);
    }

    #[tokio::test]
    async fn test_parallel_empty_input() {
        let executor = executor();
        assert!(executor.execute_parallel(vec![], None).await.is_empty());
    }
}
