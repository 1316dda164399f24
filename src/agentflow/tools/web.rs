//! Web search tool.
//!
//! The search backend is abstracted behind [`SearchProvider`] so that real
//! providers (Tavily, SerpAPI, DuckDuckGo, ...) can be plugged in without
//! touching the tool.  [`MockSearchProvider`] produces deterministic results
//! for development and tests.

use crate::agentflow::tools::{
    Tool, ToolDefinition, ToolError, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// A single search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Pluggable search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Execute a search, returning up to `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;

    /// Provider name for identification.
    fn name(&self) -> &str;
}

/// Deterministic provider for development and tests.
pub struct MockSearchProvider;

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let count = max_results.min(3);
        Ok((1..=count)
            .map(|i| SearchHit {
                title: format!("Result {} for '{}'", i, query),
                url: format!("https://example.com/search/{}", i),
                snippet: format!("Mock search result {} matching query: {}", i, query),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Web search tool over a [`SearchProvider`].
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "web_search",
            "Search the web for current information. Returns a list of results \
             with title, URL, and snippet.",
        )
        .with_parameter(ToolParameter::new(
            "query",
            ToolParameterType::String,
            "Search query string",
        ))
        .with_parameter(
            ToolParameter::new(
                "max_results",
                ToolParameterType::Integer,
                "Maximum number of results to return",
            )
            .optional()
            .with_default(json!(5)),
        )
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments(String::from("query is required")))?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;

        log::info!(
            "web_search via provider '{}': {}",
            self.provider.name(),
            query
        );
        let hits = self.provider.search(query, max_results).await?;

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "title": hit.title,
                    "url": hit.url,
                    "snippet": hit.snippet,
                })
            })
            .collect();

        Ok(ToolResult::success(json!({
            "query": query,
            "provider": self.provider.name(),
            "results": results,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_search_results() {
        let tool = WebSearchTool::new(Arc::new(MockSearchProvider));
        let result = tool
            .execute(json!({"query": "rust async", "max_results": 2}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output["query"], "rust async");
        assert_eq!(result.output["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_query_is_invalid() {
        let tool = WebSearchTool::new(Arc::new(MockSearchProvider));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
