//! rendezvousd: rendezvous broker node.
//!
//! One process plays every server-side role: it heartbeats into the shared
//! registry, parks agent tunnels, answers `/send` from other nodes, and
//! serves the public broker API.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use rendezvous_api::ApiState;
use rendezvous_core::config::RendezvousConfig;
use rendezvous_services::{
    heartbeat_loop, AnyStore, BindingCoordinator, BindingTable, ConnectionHolder, LivenessRegistry,
    TunnelListener,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RendezvousConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RendezvousConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RendezvousConfig::default()
    });

    let worker_id = config.node.worker_id();
    let endpoint = config.node.endpoint();
    tracing::info!(
        worker_id,
        tunnel = %endpoint.tunnel_endpoint(),
        receiver = %endpoint.receiver_endpoint(),
        backend = ?config.registry.backend,
        redundancy = config.relay.redundancy,
        "rendezvousd starting"
    );

    // Shared state
    let store = AnyStore::connect(&config.registry)
        .await
        .context("failed to connect to registry store")?;
    let op_timeout = config.registry.op_timeout();
    let memory_store = match &store {
        AnyStore::Memory(m) => Some(m.clone()),
        AnyStore::Redis(_) => None,
    };
    let registry = LivenessRegistry::new(store.clone(), op_timeout);
    let bindings = BindingTable::new(store, config.relay.redundancy, op_timeout);
    let coordinator = BindingCoordinator::new(registry.clone(), bindings);
    let holder = ConnectionHolder::shared();

    let state = ApiState {
        node_id: worker_id.clone(),
        coordinator,
        holder: holder.clone(),
        http: reqwest::Client::new(),
        relay_timeout: config.relay.timeout(),
    };

    // Listeners
    let bind_host = &config.node.bind_host;
    let tunnel_listener = TcpListener::bind((bind_host.as_str(), config.node.tunnel_port))
        .await
        .with_context(|| format!("failed to bind tunnel port {}", config.node.tunnel_port))?;
    let receiver_listener = TcpListener::bind((bind_host.as_str(), config.node.receiver_port))
        .await
        .with_context(|| format!("failed to bind receiver port {}", config.node.receiver_port))?;
    let broker_listener = TcpListener::bind((bind_host.as_str(), config.node.broker_port))
        .await
        .with_context(|| format!("failed to bind broker port {}", config.node.broker_port))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let heartbeat_task = tokio::spawn(heartbeat_loop(
        registry,
        worker_id,
        endpoint,
        config.registry.ttl(),
        config.registry.heartbeat_interval(),
        shutdown_tx.subscribe(),
    ));

    let tunnel_task = tokio::spawn(
        TunnelListener::new(
            tunnel_listener,
            holder.clone(),
            config.relay.handshake_timeout(),
            config.relay.max_tunnels,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let receiver_task = tokio::spawn(rendezvous_api::serve(
        receiver_listener,
        rendezvous_api::receiver_router(state.clone()),
        shutdown_tx.subscribe(),
    ));

    let broker_task = tokio::spawn(rendezvous_api::serve(
        broker_listener,
        rendezvous_api::broker_router(state),
        shutdown_tx.subscribe(),
    ));

    let tunnel_printer = {
        let holder = holder.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(count = holder.len(), "tunnel table snapshot");
                for t in holder.tunnels() {
                    tracing::debug!(
                        prefix = %t.prefix,
                        peer = %t.peer,
                        connected_secs = t.connected_secs,
                        busy = t.busy,
                        "  tunnel"
                    );
                }
            }
        })
    };

    // The in-memory backend expires lazily; sweep it periodically.
    let expiry_task = tokio::spawn(async move {
        let Some(store) = memory_store else {
            return std::future::pending::<()>().await;
        };
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "expired registry keys purged");
            }
        }
    });

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = heartbeat_task      => tracing::error!("heartbeat task exited: {:?}", r),
        r = tunnel_task         => tracing::error!("tunnel listener exited: {:?}", r),
        r = receiver_task       => tracing::error!("receiver API exited: {:?}", r),
        r = broker_task         => tracing::error!("broker API exited: {:?}", r),
        r = tunnel_printer      => tracing::error!("tunnel printer exited: {:?}", r),
        r = expiry_task         => tracing::error!("expiry task exited: {:?}", r),
    }

    Ok(())
}
