//! HTTP surface.
//!
//! The trigger and A2A plane of the platform:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/webhooks/{*path}` | Fire a webhook trigger (HMAC if secret set) |
//! | POST | `/execute/{workflow_id}` | Fire an API trigger (`X-API-Key`) |
//! | GET  | `/api-trigger/rate-limit` | Remaining budget (read-only) |
//! | GET  | `/a2a/agents/{id}/.well-known/agent.json` | Agent card |
//! | POST | `/a2a/agents/{id}/tasks` | Submit an A2A task |
//! | GET  | `/a2a/agents/{id}/tasks/{task_id}` | Poll an A2A task |
//! | POST | `/a2a/agents/{id}/tasks/{task_id}/cancel` | Cancel an A2A task |
//!
//! Entity CRUD, user auth, and the rest of the management surface live in
//! an outer deployment; this module carries the core trigger paths only.

use crate::agentflow::a2a::card::generate_agent_card;
use crate::agentflow::a2a::server::A2AServer;
use crate::agentflow::a2a::types::extract_text_from_message;
use crate::agentflow::config::PlatformConfig;
use crate::agentflow::credentials::{scope_satisfied, CredentialStore, SCOPE_WORKFLOWS_EXECUTE};
use crate::agentflow::error::PlatformError;
use crate::agentflow::models::{Agent, ApiKey};
use crate::agentflow::queue::{JobPayload, TaskQueue, TriggerType};
use crate::agentflow::rate_limiter::{rate_limit_key, RateLimiter, DEFAULT_WINDOW_SECONDS};
use crate::agentflow::repository::{
    AgentRepository, WebhookTriggerRepository, WorkflowRepository,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Shared handler state, built once at startup.
pub struct AppState {
    pub config: PlatformConfig,
    pub agents: Arc<dyn AgentRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub webhooks: Arc<dyn WebhookTriggerRepository>,
    pub credentials: Arc<CredentialStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub queue: Arc<TaskQueue>,
    pub a2a: Arc<A2AServer>,
}

/// Build the platform router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/{*path}", post(fire_webhook))
        .route("/execute/{workflow_id}", post(execute_workflow))
        .route("/api-trigger/rate-limit", get(read_rate_limit))
        .route(
            "/a2a/agents/{agent_id}/.well-known/agent.json",
            get(read_agent_card),
        )
        .route("/a2a/agents/{agent_id}/tasks", post(create_a2a_task))
        .route("/a2a/agents/{agent_id}/tasks/{task_id}", get(read_a2a_task))
        .route(
            "/a2a/agents/{agent_id}/tasks/{task_id}/cancel",
            post(cancel_a2a_task),
        )
        .with_state(state)
}

/// Bind `addr` and serve the router on a background task.  Returns the
/// bound address (useful with port 0) and the server handle.
pub async fn serve(
    state: Arc<AppState>,
    addr: &str,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), PlatformError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PlatformError::Internal(format!("could not bind {}: {}", addr, e)))?;
    let bound = listener
        .local_addr()
        .map_err(|e| PlatformError::Internal(e.to_string()))?;
    let app = build_router(state);

    log::info!("listening on {}", bound);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("server error: {}", e);
        }
    });
    Ok((bound, handle))
}

/// Verify `sha256=<hex>` against `HMAC-SHA256(secret, body)`.
///
/// The comparison hashes both rendered digests and compares those in
/// constant time, so neither length nor content leaks through timing.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(presented_hex) = header_value.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected_hex = format!("{:x}", mac.finalize().into_bytes());

    let expected = Sha256::digest(expected_hex.as_bytes());
    let presented = Sha256::digest(presented_hex.as_bytes());
    bool::from(expected.ct_eq(&presented))
}

fn require_api_key(headers: &HeaderMap) -> Result<&str, PlatformError> {
    headers
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| PlatformError::Unauthenticated(String::from("Missing API key")))
}

async fn admit(state: &AppState, key: &ApiKey) -> Result<u32, PlatformError> {
    let (allowed, remaining) = state
        .rate_limiter
        .check(&rate_limit_key(key.id), key.rate_limit, DEFAULT_WINDOW_SECONDS)
        .await;
    if !allowed {
        return Err(PlatformError::RateLimited);
    }
    Ok(remaining)
}

// --- Webhook trigger -------------------------------------------------------

async fn fire_webhook(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, PlatformError> {
    let trigger = state
        .webhooks
        .find_active_by_path(&path)
        .await?
        .ok_or_else(|| PlatformError::NotFound(String::from("Webhook not found")))?;

    if let Some(secret) = &trigger.secret {
        let signature = headers
            .get("X-Webhook-Signature")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !verify_webhook_signature(secret, &body, signature) {
            return Err(PlatformError::Unauthenticated(String::from(
                "Invalid webhook signature",
            )));
        }
    }

    // Body that is not valid JSON degrades to an empty object.
    let parsed_body: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    let header_map: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                json!(String::from_utf8_lossy(value.as_bytes())),
            )
        })
        .collect();

    state
        .webhooks
        .touch_last_triggered(trigger.id, Utc::now())
        .await?;

    let handle = state
        .queue
        .enqueue(JobPayload {
            workflow_id: trigger.workflow_id,
            trigger_type: TriggerType::Webhook,
            trigger_data: json!({
                "webhook_path": path,
                "headers": header_map,
                "body": parsed_body,
            }),
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "task_id": handle.id,
        })),
    ))
}

// --- API trigger -----------------------------------------------------------

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, PlatformError> {
    let presented = require_api_key(&headers)?;
    let key = state.credentials.validate(presented).await?;
    let remaining = admit(&state, &key).await?;

    if !scope_satisfied(&key, SCOPE_WORKFLOWS_EXECUTE) {
        return Err(PlatformError::Forbidden(format!(
            "Missing required scope: {}",
            SCOPE_WORKFLOWS_EXECUTE
        )));
    }

    // Scoped to the key's owner: a foreign workflow id reads as absent.
    let workflow = state
        .workflows
        .get_for_user(workflow_id, key.user_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(String::from("Workflow not found")))?;

    if !workflow.is_active {
        return Err(PlatformError::InvalidInput(String::from(
            "Workflow is not active",
        )));
    }

    let mut trigger_data = Map::new();
    trigger_data.insert(String::from("api_key_id"), json!(key.id));
    if let Ok(Value::Object(payload)) = serde_json::from_slice::<Value>(&body) {
        for (field, value) in payload {
            trigger_data.insert(field, value);
        }
    }

    let handle = state
        .queue
        .enqueue(JobPayload {
            workflow_id: workflow.id,
            trigger_type: TriggerType::Api,
            trigger_data: Value::Object(trigger_data),
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "task_id": handle.id,
            "workflow_id": workflow.id,
            "rate_limit_remaining": remaining,
        })),
    ))
}

async fn read_rate_limit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, PlatformError> {
    let presented = require_api_key(&headers)?;
    let key = state.credentials.validate(presented).await?;

    let remaining = state
        .rate_limiter
        .remaining(&rate_limit_key(key.id), key.rate_limit, DEFAULT_WINDOW_SECONDS)
        .await;

    Ok(Json(json!({
        "rate_limit": key.rate_limit,
        "remaining": remaining,
        "window_seconds": DEFAULT_WINDOW_SECONDS,
    })))
}

// --- A2A plane -------------------------------------------------------------

async fn a2a_enabled_agent(state: &AppState, agent_id: Uuid) -> Result<Agent, PlatformError> {
    let agent = state
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(String::from("Agent not found")))?;
    if !agent.a2a_enabled {
        return Err(PlatformError::Forbidden(String::from(
            "A2A is not enabled for this agent",
        )));
    }
    Ok(agent)
}

async fn read_agent_card(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<Uuid>,
) -> Result<impl IntoResponse, PlatformError> {
    let agent = a2a_enabled_agent(&state, agent_id).await?;
    Ok(Json(generate_agent_card(
        &agent,
        &state.config.a2a_base_url,
        &state.config.app_name,
    )))
}

async fn create_a2a_task(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<Uuid>,
    Json(request): Json<Value>,
) -> Result<impl IntoResponse, PlatformError> {
    let agent = a2a_enabled_agent(&state, agent_id).await?;

    let task_id = request
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let message = request
        .get("message")
        .map(extract_text_from_message)
        .unwrap_or_default();
    if message.is_empty() {
        return Err(PlatformError::InvalidInput(String::from(
            "Message must contain text content",
        )));
    }

    let task = state.a2a.execute_task(&agent, &task_id, &message).await;
    Ok(Json(task))
}

async fn read_a2a_task(
    State(state): State<Arc<AppState>>,
    Path((agent_id, task_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, PlatformError> {
    let agent = a2a_enabled_agent(&state, agent_id).await?;
    let task = state
        .a2a
        .get_task_status(&agent, &task_id)
        .await
        .ok_or_else(|| PlatformError::NotFound(String::from("Task not found")))?;
    Ok(Json(task))
}

async fn cancel_a2a_task(
    State(state): State<Arc<AppState>>,
    Path((agent_id, task_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, PlatformError> {
    let agent = a2a_enabled_agent(&state, agent_id).await?;
    let task = state
        .a2a
        .cancel_task(&agent, &task_id)
        .await
        .ok_or_else(|| PlatformError::NotFound(String::from("Task not found")))?;
    Ok(Json(task))
}
