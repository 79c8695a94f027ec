//! Binding table: which nodes hold tunnels for each prefix.
//!
//! `proxies:<prefix>` stores the JSON list of the bound nodes' registry keys
//! (`servers:<worker_id>`), in selection order. Bindings never expire; a new
//! bind for the same prefix overwrites the old one (last writer wins).

use std::time::Duration;

use rendezvous_core::wire::{proxies_key, servers_key, validate_prefix, worker_id_from_key};
use rendezvous_core::{PrefixBinding, RelayError};

use crate::registry::bounded;
use crate::store::KvStore;

#[derive(Clone)]
pub struct BindingTable<S> {
    store: S,
    redundancy: usize,
    op_timeout: Duration,
}

impl<S: KvStore> BindingTable<S> {
    pub fn new(store: S, redundancy: usize, op_timeout: Duration) -> Self {
        Self {
            store,
            redundancy: redundancy.max(1),
            op_timeout,
        }
    }

    pub fn redundancy(&self) -> usize {
        self.redundancy
    }

    /// Record `prefix → candidates`.
    ///
    /// Exactly R distinct workers are required. Order is preserved, and it is
    /// the order in which the relay tries them.
    pub async fn create_binding(
        &self,
        prefix: &str,
        candidates: &[String],
    ) -> Result<PrefixBinding, RelayError> {
        validate_prefix(prefix)?;

        let mut worker_ids: Vec<String> = Vec::with_capacity(candidates.len());
        for id in candidates {
            if !worker_ids.contains(id) {
                worker_ids.push(id.clone());
            }
        }
        if worker_ids.len() != self.redundancy {
            return Err(RelayError::InsufficientWorkers {
                needed: self.redundancy,
                found: worker_ids.len(),
            });
        }

        let keys: Vec<String> = worker_ids.iter().map(|id| servers_key(id)).collect();
        let value =
            serde_json::to_string(&keys).map_err(|e| RelayError::StoreUnavailable(e.to_string()))?;
        bounded(self.op_timeout, self.store.set(&proxies_key(prefix), &value, None)).await?;

        tracing::info!(prefix, workers = ?worker_ids, "binding recorded");
        Ok(PrefixBinding {
            prefix: prefix.to_string(),
            worker_ids,
        })
    }

    /// The binding for `prefix`, or [`RelayError::NoBinding`].
    pub async fn lookup(&self, prefix: &str) -> Result<PrefixBinding, RelayError> {
        let raw = bounded(self.op_timeout, self.store.get(&proxies_key(prefix)))
            .await?
            .ok_or_else(|| RelayError::NoBinding(prefix.to_string()))?;
        let keys: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            RelayError::StoreUnavailable(format!("corrupt binding for {prefix}: {e}"))
        })?;
        let worker_ids = keys
            .iter()
            .map(|key| worker_id_from_key(key).unwrap_or(key).to_string())
            .collect();
        Ok(PrefixBinding {
            prefix: prefix.to_string(),
            worker_ids,
        })
    }
}
