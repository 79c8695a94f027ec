//! Run a tunnel agent for a local application until ctrl-c.

use anyhow::{Context, Result};

use rendezvous_core::config::AgentConfig;
use rendezvous_services::TunnelAgent;

pub async fn cmd_tunnel(broker: &str, local_port: &str, prefix: &str, config: &AgentConfig) -> Result<()> {
    let port: u16 = local_port.parse().context("local port must be a number")?;
    let local_base = format!("http://127.0.0.1:{port}");

    let agent = TunnelAgent::new(broker, prefix, &local_base)?
        .with_local_timeout(config.local_timeout())
        .with_reconnect_delay(config.reconnect_delay());

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, closing tunnels");
        let _ = shutdown_tx.send(());
    });

    println!("Tunnelling '{}' → {} via {}", prefix, local_base, broker);
    println!("Query it with: {}/query/<path>?prefix={}", broker, prefix);
    tracing::debug!(prefix, local = %local_base, broker, "starting agent");
    agent.run(shutdown_rx).await
}
