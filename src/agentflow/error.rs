//! Platform error type.
//!
//! One semantic error enum is shared by every subsystem.  The variants are
//! deliberately coarse: they describe *what kind* of failure occurred, not
//! where.  The HTTP layer maps each kind to a canonical status code, while
//! long-running jobs surface the rendered message into the execution
//! record's `error` field.
//!
//! Two kinds deserve a note:
//!
//! - Tool failures are **not** errors.  A failing tool produces a non-ok
//!   [`ToolResult`](crate::agentflow::tools::ToolResult) that is embedded in
//!   the conversation and fed back to the LLM.
//! - `NotFound` covers both "does not exist" and "exists but belongs to a
//!   different tenant".  The two are indistinguishable on the wire so that
//!   resource ids cannot be probed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::error::Error;
use std::fmt;

/// Semantic failure kinds for the platform.
#[derive(Debug, Clone)]
pub enum PlatformError {
    /// The addressed entity does not exist, or is not visible to the caller.
    NotFound(String),
    /// No credential was presented, or credential validation failed.
    Unauthenticated(String),
    /// Authenticated but lacking scope, or the resource's policy disallows.
    Forbidden(String),
    /// Uniqueness or state conflict.
    Conflict(String),
    /// Admission denied by the rate limiter.
    RateLimited,
    /// Validation failed: bad cron, bad body shape, empty message, cycle.
    InvalidInput(String),
    /// An LLM, KV, or network dependency failed.
    Upstream(String),
    /// Bug or invariant violation.
    Internal(String),
}

impl PlatformError {
    /// Canonical HTTP status code for this error kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            PlatformError::Forbidden(_) => StatusCode::FORBIDDEN,
            PlatformError::Conflict(_) => StatusCode::CONFLICT,
            PlatformError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            PlatformError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PlatformError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PlatformError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::NotFound(msg) => write!(f, "{}", msg),
            PlatformError::Unauthenticated(msg) => write!(f, "{}", msg),
            PlatformError::Forbidden(msg) => write!(f, "{}", msg),
            PlatformError::Conflict(msg) => write!(f, "{}", msg),
            PlatformError::RateLimited => write!(f, "Rate limit exceeded"),
            PlatformError::InvalidInput(msg) => write!(f, "{}", msg),
            PlatformError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            PlatformError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl Error for PlatformError {}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
