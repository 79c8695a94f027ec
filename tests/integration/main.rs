//! Rendezvous integration test harness.
//!
//! Every test runs in-process: broker nodes share one in-memory registry,
//! each node binds its tunnel, receiver and broker listeners on ephemeral
//! loopback ports, and a real agent tunnels a small local axum app.
//!
//!   cargo test --test integration

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rendezvous_api::ApiState;
use rendezvous_core::WorkerEndpoint;
use rendezvous_services::{
    heartbeat_loop, AnyStore, BindingCoordinator, BindingTable, ConnectionHolder, LivenessRegistry,
    MemoryStore, TunnelListener,
};

mod binding;
mod relay;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TTL: Duration = Duration::from_secs(10);

/// One broker node, fully wired.
pub struct Node {
    pub id: String,
    pub broker_url: String,
    pub state: ApiState,
    shutdown: broadcast::Sender<()>,
}

impl Node {
    /// Stop every task on this node: listeners, sessions, heartbeat.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

pub async fn start_node(store: &MemoryStore, id: &str, redundancy: usize) -> Result<Node> {
    let tunnel_listener = TcpListener::bind("127.0.0.1:0").await?;
    let receiver_listener = TcpListener::bind("127.0.0.1:0").await?;
    let broker_listener = TcpListener::bind("127.0.0.1:0").await?;

    let endpoint = WorkerEndpoint {
        host: "127.0.0.1".to_string(),
        tunnel_port: tunnel_listener.local_addr()?.port(),
        receiver_port: receiver_listener.local_addr()?.port(),
    };
    let broker_url = format!("http://{}", broker_listener.local_addr()?);

    let store = AnyStore::Memory(store.clone());
    let op_timeout = Duration::from_secs(2);
    let registry = LivenessRegistry::new(store.clone(), op_timeout);
    let coordinator = BindingCoordinator::new(
        registry.clone(),
        BindingTable::new(store, redundancy, op_timeout),
    );
    let holder = ConnectionHolder::shared();
    let state = ApiState {
        node_id: id.to_string(),
        coordinator,
        holder: holder.clone(),
        http: reqwest::Client::new(),
        relay_timeout: Duration::from_secs(5),
    };

    // Registered before returning so callers can bind right away.
    registry.heartbeat(id, &endpoint, TTL).await?;

    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(heartbeat_loop(
        registry,
        id.to_string(),
        endpoint,
        TTL,
        TTL / 2,
        shutdown.subscribe(),
    ));
    tokio::spawn(
        TunnelListener::new(tunnel_listener, holder, Duration::from_secs(5), 64, shutdown.subscribe()).run(),
    );
    tokio::spawn(rendezvous_api::serve(
        receiver_listener,
        rendezvous_api::receiver_router(state.clone()),
        shutdown.subscribe(),
    ));
    tokio::spawn(rendezvous_api::serve(
        broker_listener,
        rendezvous_api::broker_router(state.clone()),
        shutdown.subscribe(),
    ));

    Ok(Node {
        id: id.to_string(),
        broker_url,
        state,
        shutdown,
    })
}

/// The application an agent exposes. Answers `/status` and `/whoami`.
pub async fn start_local_app(name: &str) -> Result<String> {
    let name = name.to_string();
    let app = Router::new()
        .route("/status", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .route(
            "/whoami",
            get(move || {
                let name = name.clone();
                async move { Json(serde_json::json!({ "name": name })) }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn wait_until<F, Fut>(what: &str, mut cond: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if cond().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("timed out waiting for {what}")
}

/// GET `url`, returning status code and JSON body.
pub async fn get_json(url: &str) -> Result<(u16, serde_json::Value)> {
    let resp = reqwest::get(url).await?;
    let status = resp.status().as_u16();
    Ok((status, resp.json().await?))
}

pub async fn post_json(url: &str, body: serde_json::Value) -> Result<(u16, serde_json::Value)> {
    let resp = reqwest::Client::new().post(url).json(&body).send().await?;
    let status = resp.status().as_u16();
    Ok((status, resp.json().await?))
}
