//! Registry records: what the liveness registry and binding table store.

use serde::{Deserialize, Serialize};

/// Where a node can be reached. Ports are fixed per deployment but carried in
/// the record so nodes sharing a host stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub host: String,
    /// WebSocket port agents dial to park a tunnel.
    pub tunnel_port: u16,
    /// HTTP port serving `POST /send`.
    pub receiver_port: u16,
}

impl WorkerEndpoint {
    pub fn tunnel_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.tunnel_port)
    }

    pub fn receiver_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.receiver_port)
    }
}

/// A live node, as stored under `servers:<worker_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    #[serde(flatten)]
    pub endpoint: WorkerEndpoint,
    /// Unix milliseconds at which the store drops the record.
    pub expires_at: u64,
}

/// A prefix bound to exactly R nodes, in selection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixBinding {
    pub prefix: String,
    pub worker_ids: Vec<String>,
}
