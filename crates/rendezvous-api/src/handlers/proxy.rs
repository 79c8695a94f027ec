//! POST /proxy/create: bind a prefix to R live nodes.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{required, ApiError, ApiState};

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub prefix: Option<String>,
    /// Where the requester's application lives. Logged only.
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    /// Tunnel endpoints (`host:port`) to dial, in binding order.
    pub workers: Vec<String>,
}

pub async fn handle_proxy_create(
    State(state): State<ApiState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<CreateResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let prefix = required(req.prefix, "prefix")?;
    let address = required(req.address, "address")?;

    let workers = state.coordinator.bind(&prefix).await.map_err(|e| {
        tracing::warn!(prefix, error = %e, "bind failed");
        ApiError::from(e)
    })?;
    tracing::info!(prefix, address, workers = ?workers, "proxy created");
    Ok(Json(CreateResponse { workers }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::broker_router;
    use crate::handlers::tests::{spawn, state_with};
    use rendezvous_core::WorkerEndpoint;
    use rendezvous_services::MemoryStore;

    fn endpoint(host: &str, tunnel_port: u16) -> WorkerEndpoint {
        WorkerEndpoint {
            host: host.into(),
            tunnel_port,
            receiver_port: 5001,
        }
    }

    #[tokio::test]
    async fn create_binds_two_live_workers() {
        let state = state_with(MemoryStore::new(), "w1", 2);
        let reg = state.coordinator.registry().clone();
        reg.heartbeat("w1", &endpoint("10.0.0.1", 8765), Duration::from_secs(10)).await.unwrap();
        reg.heartbeat("w2", &endpoint("10.0.0.2", 8765), Duration::from_secs(10)).await.unwrap();
        let base = spawn(broker_router(state)).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/proxy/create"))
            .json(&json!({ "prefix": "svc", "address": "127.0.0.1:8080" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "workers": ["10.0.0.1:8765", "10.0.0.2:8765"] }));
    }

    #[tokio::test]
    async fn create_with_one_live_worker_is_500() {
        let state = state_with(MemoryStore::new(), "w1", 2);
        state
            .coordinator
            .registry()
            .heartbeat("w1", &endpoint("10.0.0.1", 8765), Duration::from_secs(10))
            .await
            .unwrap();
        let base = spawn(broker_router(state)).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/proxy/create"))
            .json(&json!({ "prefix": "svc", "address": "a:1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "insufficient_workers");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let base = spawn(broker_router(state_with(MemoryStore::new(), "w1", 2))).await;
        let http = reqwest::Client::new();
        let url = format!("{base}/proxy/create");

        for body in [
            json!({ "address": "a:1" }),
            json!({ "prefix": "svc" }),
            json!({ "prefix": "", "address": "a:1" }),
        ] {
            let resp = http.post(&url).json(&body).send().await.unwrap();
            assert_eq!(resp.status(), 400, "{body}");
            let err: Value = resp.json().await.unwrap();
            assert_eq!(err["kind"], "bad_request");
        }

        let resp = http
            .post(&url)
            .json(&json!({ "prefix": "TooLong1", "address": "a:1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["kind"], "invalid_prefix");

        let resp = http
            .post(&url)
            .header("content-type", "application/json")
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
