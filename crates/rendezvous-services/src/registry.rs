//! Liveness registry: which broker nodes are currently alive.
//!
//! Each node upserts `servers:<worker_id>` with a TTL on a fixed period.
//! A node that stops heartbeating drops out once its record expires; no
//! explicit deregistration happens.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use rendezvous_core::wire::{servers_key, worker_id_from_key, SERVERS_KEY_PREFIX};
use rendezvous_core::{RelayError, WorkerEndpoint, WorkerRecord};

use crate::store::{KvStore, StoreError};

#[derive(Clone)]
pub struct LivenessRegistry<S> {
    store: S,
    op_timeout: Duration,
}

impl<S: KvStore> LivenessRegistry<S> {
    pub fn new(store: S, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Upsert this node's record, valid for `ttl` from now.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        endpoint: &WorkerEndpoint,
        ttl: Duration,
    ) -> Result<WorkerRecord, RelayError> {
        let record = WorkerRecord {
            worker_id: worker_id.to_string(),
            endpoint: endpoint.clone(),
            expires_at: now_ms() + ttl.as_millis() as u64,
        };
        let value =
            serde_json::to_string(&record).map_err(|e| RelayError::StoreUnavailable(e.to_string()))?;
        bounded(self.op_timeout, self.store.set(&servers_key(worker_id), &value, Some(ttl))).await?;
        Ok(record)
    }

    /// Up to `limit` live records, ordered by worker id.
    ///
    /// The ordering is deterministic so concurrent binders over the same
    /// snapshot pick the same nodes. Records that expire or go missing
    /// between the scan and the read are skipped, as are unparsable ones.
    pub async fn list_live(&self, limit: usize) -> Result<Vec<WorkerRecord>, RelayError> {
        let mut keys = bounded(self.op_timeout, self.store.scan_prefix(SERVERS_KEY_PREFIX)).await?;
        keys.sort();

        let mut live = Vec::with_capacity(limit.min(keys.len()));
        for key in keys {
            if live.len() >= limit {
                break;
            }
            let Some(worker_id) = worker_id_from_key(&key) else {
                continue;
            };
            if let Some(record) = self.get(worker_id).await? {
                live.push(record);
            }
        }
        Ok(live)
    }

    /// The record for one node, if it is still live.
    ///
    /// Expiry is the store's call; `expires_at` is informational and never
    /// compared against this node's clock.
    pub async fn get(&self, worker_id: &str) -> Result<Option<WorkerRecord>, RelayError> {
        let raw = bounded(self.op_timeout, self.store.get(&servers_key(worker_id))).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<WorkerRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "skipping unparsable liveness record");
                Ok(None)
            }
        }
    }
}

/// Refresh this node's liveness record every `interval` until shutdown.
///
/// A failed heartbeat is logged and retried on the next tick; the record
/// lapses only if failures outlast the TTL.
pub async fn heartbeat_loop<S: KvStore>(
    registry: LivenessRegistry<S>,
    worker_id: String,
    endpoint: WorkerEndpoint,
    ttl: Duration,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(worker_id, ttl_secs = ttl.as_secs(), "heartbeat loop starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(worker_id, "heartbeat loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                match registry.heartbeat(&worker_id, &endpoint, ttl).await {
                    Ok(record) => tracing::trace!(worker_id, expires_at = record.expires_at, "heartbeat"),
                    Err(e) => tracing::warn!(worker_id, error = %e, "heartbeat failed"),
                }
            }
        }
    }
}

/// Run a store call under `timeout`. Elapsing counts as the store being
/// unavailable.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, RelayError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(RelayError::from),
        Err(_) => Err(RelayError::StoreUnavailable(format!(
            "store call exceeded {timeout:?}"
        ))),
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
