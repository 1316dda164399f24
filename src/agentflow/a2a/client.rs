//! A2A client.
//!
//! Talks to remote agents: fetches the agent card, submits tasks, polls
//! and cancels them.  Idempotent GETs retry once on connection errors;
//! task submissions never retry.

use crate::agentflow::error::PlatformError;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the A2A protocol.
pub struct A2AClient {
    http: reqwest::Client,
}

impl A2AClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Fetch the agent card from `{agent_url}/.well-known/agent.json`.
    pub async fn get_agent_card(&self, agent_url: &str) -> Result<Value, PlatformError> {
        let base_url = agent_url.trim_end_matches('/');
        let card_url = format!("{}/.well-known/agent.json", base_url);
        self.get_json(&card_url, "agent card").await
    }

    /// Submit a task to `{agent_url}/tasks` and return the task response.
    pub async fn send_task(
        &self,
        agent_url: &str,
        message: &str,
        task_id: Option<&str>,
    ) -> Result<Value, PlatformError> {
        let base_url = agent_url.trim_end_matches('/');
        let tasks_url = format!("{}/tasks", base_url);

        let mut request_body = json!({
            "message": {
                "role": "user",
                "parts": [{"type": "text", "text": message}],
            }
        });
        if let Some(task_id) = task_id {
            request_body["id"] = json!(task_id);
        }

        let response = self
            .http
            .post(&tasks_url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| PlatformError::Upstream(format!("Failed to connect to agent: {}", e)))?;

        Self::read_json(response, "task submission").await
    }

    /// Poll a task at `{agent_url}/tasks/{task_id}`.
    pub async fn get_task(&self, agent_url: &str, task_id: &str) -> Result<Value, PlatformError> {
        let base_url = agent_url.trim_end_matches('/');
        let task_url = format!("{}/tasks/{}", base_url, task_id);
        self.get_json(&task_url, "task").await
    }

    /// Cancel a task at `{agent_url}/tasks/{task_id}/cancel`.
    pub async fn cancel_task(
        &self,
        agent_url: &str,
        task_id: &str,
    ) -> Result<Value, PlatformError> {
        let base_url = agent_url.trim_end_matches('/');
        let cancel_url = format!("{}/tasks/{}/cancel", base_url, task_id);

        let response = self
            .http
            .post(&cancel_url)
            .send()
            .await
            .map_err(|e| PlatformError::Upstream(format!("Failed to connect to agent: {}", e)))?;

        Self::read_json(response, "task cancel").await
    }

    /// GET with a single retry on connection errors.
    async fn get_json(&self, url: &str, what: &str) -> Result<Value, PlatformError> {
        let mut last_err = None;
        for attempt in 0..2 {
            match self.http.get(url).send().await {
                Ok(response) => return Self::read_json(response, what).await,
                Err(e) if e.is_connect() && attempt == 0 => {
                    log::warn!("retrying {} fetch after connect error: {}", what, e);
                    last_err = Some(e);
                }
                Err(e) => {
                    return Err(PlatformError::Upstream(format!(
                        "Failed to connect to agent: {}",
                        e
                    )))
                }
            }
        }
        Err(PlatformError::Upstream(format!(
            "Failed to connect to agent: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn read_json(response: reqwest::Response, what: &str) -> Result<Value, PlatformError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(format!("{} not found", what)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PlatformError::Upstream(format!(
                "{} request failed with {}: {}",
                what, status, text
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PlatformError::Upstream(format!("Invalid {} response: {}", what, e)))
    }
}

impl Default for A2AClient {
    fn default() -> Self {
        Self::new()
    }
}
