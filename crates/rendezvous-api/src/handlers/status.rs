//! GET /status: what this node holds and what the registry sees.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use rendezvous_services::TunnelInfo;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub redundancy: usize,
    /// `None` when the registry could not be read.
    pub live_workers: Option<usize>,
    pub tunnels: Vec<TunnelInfo>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let live_workers = match state.coordinator.registry().list_live(usize::MAX).await {
        Ok(live) => Some(live.len()),
        Err(e) => {
            tracing::warn!(error = %e, "status: registry unavailable");
            None
        }
    };

    Json(StatusResponse {
        node_id: state.node_id.clone(),
        redundancy: state.coordinator.redundancy(),
        live_workers,
        tunnels: state.holder.tunnels(),
    })
}
