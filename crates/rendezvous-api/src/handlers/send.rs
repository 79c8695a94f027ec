//! POST /send: relay through a tunnel parked on this node.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use rendezvous_core::wire::Payload;

use super::{required, ApiError, ApiState};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub prefix: Option<String>,
    pub subpath: Option<String>,
}

pub async fn handle_send(
    State(state): State<ApiState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Payload>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let prefix = required(req.prefix, "prefix")?;
    let subpath = required(req.subpath, "subpath")?;

    match state.holder.relay(&prefix, &subpath, state.relay_timeout).await {
        Ok(payload) => Ok(Json(payload)),
        Err(e) => {
            tracing::warn!(prefix, subpath, error = %e, "relay failed");
            Err(e.into())
        }
    }
}
