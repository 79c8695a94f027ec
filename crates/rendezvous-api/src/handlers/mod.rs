//! HTTP handlers for the broker and receiver surfaces.

pub mod proxy;
pub mod query;
pub mod send;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use rendezvous_core::RelayError;
use rendezvous_services::{AnyStore, BindingCoordinator, ConnectionHolder};

#[derive(Clone)]
pub struct ApiState {
    /// This node's registry identity.
    pub node_id: String,
    pub coordinator: BindingCoordinator<AnyStore>,
    pub holder: Arc<ConnectionHolder>,
    /// Client for node-to-node `/send` calls.
    pub http: reqwest::Client,
    /// Bound on one relay, end to end.
    pub relay_timeout: Duration,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Error response: `{"error": "<message>", "kind": "<kind>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidPrefix(_) => StatusCode::BAD_REQUEST,
        RelayError::NoBinding(_) | RelayError::NoActiveTunnel(_) => StatusCode::NOT_FOUND,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::InsufficientWorkers { .. }
        | RelayError::TunnelClosed(_)
        | RelayError::ReceiverUnavailable(_)
        | RelayError::MalformedHandshake(_)
        | RelayError::ProtocolViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self {
            status: status_for(&err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

/// A required request field: absent and empty both count as missing.
fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing field: {name}")))
}

pub use proxy::handle_proxy_create;
pub use query::handle_query;
pub use send::handle_send;
pub use status::handle_status;
