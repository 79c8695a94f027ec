//! Tunnel listener: accepts agent connections on the tunnel port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

use super::session::run_session;
use super::ConnectionHolder;

pub struct TunnelListener {
    listener: TcpListener,
    holder: Arc<ConnectionHolder>,
    handshake_timeout: Duration,
    max_tunnels: usize,
    shutdown: broadcast::Receiver<()>,
}

impl TunnelListener {
    pub fn new(
        listener: TcpListener,
        holder: Arc<ConnectionHolder>,
        handshake_timeout: Duration,
        max_tunnels: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            holder,
            handshake_timeout,
            max_tunnels: max_tunnels.max(1),
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_tunnels));
        tracing::info!(
            addr = %self.listener.local_addr()?,
            max_tunnels = self.max_tunnels,
            "tunnel listener starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("tunnel listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "tunnel accept failed");
                            continue;
                        }
                    };

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(peer = %peer, max = self.max_tunnels, "tunnel limit reached, rejecting");
                            drop(stream);
                            continue;
                        }
                    };

                    let holder = self.holder.clone();
                    let handshake_timeout = self.handshake_timeout;
                    let shutdown = self.shutdown.resubscribe();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let upgrade = tokio::time::timeout(
                            handshake_timeout,
                            tokio_tungstenite::accept_async(stream),
                        );
                        let ws = match upgrade.await {
                            Ok(Ok(ws)) => ws,
                            Ok(Err(e)) => {
                                tracing::debug!(peer = %peer, error = %e, "websocket upgrade failed");
                                return;
                            }
                            Err(_) => {
                                tracing::debug!(peer = %peer, "websocket upgrade timed out");
                                return;
                            }
                        };
                        if let Err(e) = run_session(ws, peer, holder, handshake_timeout, shutdown).await {
                            tracing::debug!(peer = %peer, error = %e, "tunnel session ended with error");
                        }
                    });
                }
            }
        }
    }
}
