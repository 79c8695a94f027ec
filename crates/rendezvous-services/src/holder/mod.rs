//! Connection holder: the per-node table of parked tunnels.
//!
//! Agents dial in over WebSocket and announce a prefix; the holder keeps at
//! most one tunnel per prefix (the most recent one) and relays requests
//! through it.

mod listener;
mod session;
mod tunnel;

pub use listener::TunnelListener;
pub use session::run_session;
pub use tunnel::Tunnel;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use rendezvous_core::wire::Payload;
use rendezvous_core::RelayError;

/// Snapshot of one parked tunnel, for `/status` and logs.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelInfo {
    pub id: u64,
    pub prefix: String,
    pub peer: SocketAddr,
    pub connected_secs: u64,
    pub busy: bool,
}

#[derive(Default)]
pub struct ConnectionHolder {
    tunnels: DashMap<String, Arc<Tunnel>>,
    next_id: AtomicU64,
}

impl ConnectionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Identity for a new tunnel. Unique for the life of the process.
    pub fn next_tunnel_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Park `tunnel` under its prefix, returning the tunnel it displaced.
    ///
    /// The displaced tunnel is not closed; it stays connected, unreachable
    /// through the table, until its peer goes away.
    pub fn register(&self, tunnel: Arc<Tunnel>) -> Option<Arc<Tunnel>> {
        self.tunnels.insert(tunnel.prefix().to_string(), tunnel)
    }

    /// Remove the entry for `prefix` only if it is still tunnel `id`.
    /// A newer tunnel under the same prefix is left alone.
    pub fn remove_if_current(&self, prefix: &str, id: u64) -> bool {
        self.tunnels.remove_if(prefix, |_, t| t.id() == id).is_some()
    }

    pub fn get(&self, prefix: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(prefix).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Parked tunnels, ordered by prefix.
    pub fn tunnels(&self) -> Vec<TunnelInfo> {
        let mut infos: Vec<TunnelInfo> = self
            .tunnels
            .iter()
            .map(|entry| {
                let t = entry.value();
                TunnelInfo {
                    id: t.id(),
                    prefix: t.prefix().to_string(),
                    peer: t.peer(),
                    connected_secs: t.uptime().as_secs(),
                    busy: t.is_busy(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        infos
    }

    /// Relay one request through the tunnel parked for `prefix`.
    pub async fn relay(
        &self,
        prefix: &str,
        subpath: &str,
        timeout: Duration,
    ) -> Result<Payload, RelayError> {
        // Clone out of the map; no shard guard may live across the await.
        let tunnel = self
            .get(prefix)
            .ok_or_else(|| RelayError::NoActiveTunnel(prefix.to_string()))?;
        tracing::debug!(prefix, subpath, tunnel = tunnel.id(), "relaying");
        tunnel.exchange(subpath, timeout).await
    }
}
