//! GET /query/{*subpath}?prefix=<p>: the public relay entry point.
//!
//! Resolves the prefix to its bound nodes and asks each one, in binding
//! order, to relay through its parked tunnel. The first success wins.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tokio::time::Instant;

use rendezvous_core::wire::{validate_prefix, Payload};
use rendezvous_core::{RelayError, WorkerRecord};

use super::{ApiError, ApiState};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub prefix: Option<String>,
}

pub async fn handle_query(
    State(state): State<ApiState>,
    Path(subpath): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Payload>, ApiError> {
    let prefix = params
        .prefix
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing query parameter: prefix"))?;
    validate_prefix(&prefix)?;

    let workers = state.coordinator.resolve(&prefix).await?;
    if workers.is_empty() {
        tracing::warn!(prefix, "every bound worker has lapsed");
        return Err(RelayError::NoActiveTunnel(prefix).into());
    }

    let deadline = Instant::now() + state.relay_timeout;
    let mut failure: Option<RelayError> = None;

    for worker in &workers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            failure = Some(RelayError::Timeout {
                prefix: prefix.clone(),
                after: state.relay_timeout,
            });
            break;
        }

        match relay_via(&state, worker, &prefix, &subpath, remaining).await {
            Ok(payload) => return Ok(Json(payload)),
            Err(e) => {
                tracing::debug!(prefix, worker_id = %worker.worker_id, error = %e, "relay attempt failed");
                // A missing tunnel says the least about what went wrong.
                let keep_previous = matches!(&failure, Some(prev) if !matches!(prev, RelayError::NoActiveTunnel(_)));
                if !keep_previous {
                    failure = Some(e);
                }
            }
        }
    }

    let err = failure.unwrap_or_else(|| RelayError::NoActiveTunnel(prefix.clone()));
    tracing::warn!(prefix, subpath, error = %err, "query failed on every bound worker");
    Err(err.into())
}

/// One relay attempt through `worker`. Our own tunnels are used directly.
async fn relay_via(
    state: &ApiState,
    worker: &WorkerRecord,
    prefix: &str,
    subpath: &str,
    timeout: std::time::Duration,
) -> Result<Payload, RelayError> {
    if worker.worker_id == state.node_id {
        return state.holder.relay(prefix, subpath, timeout).await;
    }

    let url = format!("http://{}/send", worker.endpoint.receiver_endpoint());
    let timed_out = || RelayError::Timeout {
        prefix: prefix.to_string(),
        after: timeout,
    };

    let resp = state
        .http
        .post(&url)
        .json(&serde_json::json!({ "prefix": prefix, "subpath": subpath }))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                timed_out()
            } else {
                RelayError::ReceiverUnavailable(format!("{url}: {e}"))
            }
        })?;

    let status = resp.status();
    let body: Payload = resp.json().await.map_err(|e| {
        if e.is_timeout() {
            timed_out()
        } else {
            RelayError::ReceiverUnavailable(format!("{url}: unreadable response: {e}"))
        }
    })?;

    if status.is_success() {
        return Ok(body);
    }
    let kind = body["kind"].as_str().unwrap_or_default();
    if kind == "timeout" {
        return Err(timed_out());
    }
    let message = body["error"].as_str().unwrap_or_default().to_string();
    Err(RelayError::from_kind(kind, prefix, message.clone())
        .unwrap_or_else(|| RelayError::ReceiverUnavailable(format!("{url} returned {status}: {message}"))))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::handlers::tests::{spawn, state_with};
    use crate::{broker_router, receiver_router};
    use rendezvous_core::wire::Payload;
    use rendezvous_core::WorkerEndpoint;
    use rendezvous_services::holder::Tunnel;
    use rendezvous_services::{ConnectionHolder, KvStore, MemoryStore};

    const TTL: Duration = Duration::from_secs(10);

    /// Park a fake tunnel that answers every request with `reply`.
    fn park_echo(holder: &ConnectionHolder, prefix: &str, reply: Payload) {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);
        let (reply_tx, reply_rx) = mpsc::channel(8);
        holder.register(Arc::new(Tunnel::new(
            holder.next_tunnel_id(),
            prefix.into(),
            "127.0.0.1:9".parse().unwrap(),
            out_tx,
            reply_rx,
        )));
        tokio::spawn(async move {
            while out_rx.recv().await.is_some() {
                if reply_tx.send(reply.clone()).await.is_err() {
                    break;
                }
            }
        });
    }

    fn port_of(base: &str) -> u16 {
        base.rsplit(':').next().unwrap().parse().unwrap()
    }

    async fn get(url: String) -> (u16, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn missing_or_invalid_prefix_is_400() {
        let base = spawn(broker_router(state_with(MemoryStore::new(), "w1", 2))).await;
        let (status, body) = get(format!("{base}/query/status")).await;
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "bad_request");

        let (status, body) = get(format!("{base}/query/status?prefix=AB")).await;
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "invalid_prefix");
    }

    #[tokio::test]
    async fn unbound_prefix_is_404() {
        let base = spawn(broker_router(state_with(MemoryStore::new(), "w1", 2))).await;
        let (status, body) = get(format!("{base}/query/status?prefix=svc")).await;
        assert_eq!(status, 404);
        assert_eq!(body["kind"], "no_binding");
    }

    #[tokio::test]
    async fn local_tunnel_answers_directly() {
        let state = state_with(MemoryStore::new(), "w1", 1);
        state
            .coordinator
            .registry()
            .heartbeat("w1", &WorkerEndpoint { host: "127.0.0.1".into(), tunnel_port: 1, receiver_port: 1 }, TTL)
            .await
            .unwrap();
        state.coordinator.bind("svc").await.unwrap();
        park_echo(&state.holder, "svc", json!({ "from": "local" }));

        let base = spawn(broker_router(state)).await;
        let (status, body) = get(format!("{base}/query/a/b?prefix=svc")).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "from": "local" }));
    }

    #[tokio::test]
    async fn falls_over_to_the_node_holding_the_tunnel() {
        let store = MemoryStore::new();

        // Remote node w2 holds the tunnel and serves /send.
        let remote = state_with(store.clone(), "w2", 2);
        park_echo(&remote.holder, "svc", json!({ "from": "w2" }));
        let remote_base = spawn(receiver_router(remote)).await;

        // Broker node w1 has no tunnel for the prefix.
        let broker = state_with(store.clone(), "w1", 2);
        let reg = broker.coordinator.registry().clone();
        reg.heartbeat("w1", &WorkerEndpoint { host: "127.0.0.1".into(), tunnel_port: 1, receiver_port: 1 }, TTL)
            .await
            .unwrap();
        reg.heartbeat(
            "w2",
            &WorkerEndpoint { host: "127.0.0.1".into(), tunnel_port: 2, receiver_port: port_of(&remote_base) },
            TTL,
        )
        .await
        .unwrap();
        broker.coordinator.bind("svc").await.unwrap();

        let base = spawn(broker_router(broker)).await;
        let (status, body) = get(format!("{base}/query/status?prefix=svc")).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "from": "w2" }));
    }

    #[tokio::test]
    async fn no_node_holding_a_tunnel_is_404() {
        let store = MemoryStore::new();
        let remote_base = spawn(receiver_router(state_with(store.clone(), "w2", 2))).await;

        let broker = state_with(store.clone(), "w1", 2);
        let reg = broker.coordinator.registry().clone();
        reg.heartbeat("w1", &WorkerEndpoint { host: "127.0.0.1".into(), tunnel_port: 1, receiver_port: 1 }, TTL)
            .await
            .unwrap();
        reg.heartbeat(
            "w2",
            &WorkerEndpoint { host: "127.0.0.1".into(), tunnel_port: 2, receiver_port: port_of(&remote_base) },
            TTL,
        )
        .await
        .unwrap();
        broker.coordinator.bind("svc").await.unwrap();

        let base = spawn(broker_router(broker)).await;
        let (status, body) = get(format!("{base}/query/status?prefix=svc")).await;
        assert_eq!(status, 404);
        assert_eq!(body["kind"], "no_active_tunnel");
    }

    #[tokio::test]
    async fn lapsed_workers_are_404() {
        let store = MemoryStore::new();
        store
            .set("proxies:svc", r#"["servers:gone1","servers:gone2"]"#, None)
            .await
            .unwrap();
        let base = spawn(broker_router(state_with(store, "w1", 2))).await;
        let (status, body) = get(format!("{base}/query/status?prefix=svc")).await;
        assert_eq!(status, 404);
        assert_eq!(body["kind"], "no_active_tunnel");
    }
}
