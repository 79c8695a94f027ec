//! Binding coordinator: turns "bind this prefix" into a set of tunnel
//! endpoints, and a prefix back into the live nodes that should hold it.

use rendezvous_core::wire::validate_prefix;
use rendezvous_core::{RelayError, WorkerRecord};

use crate::binding::BindingTable;
use crate::registry::LivenessRegistry;
use crate::store::KvStore;

#[derive(Clone)]
pub struct BindingCoordinator<S> {
    registry: LivenessRegistry<S>,
    bindings: BindingTable<S>,
}

impl<S: KvStore> BindingCoordinator<S> {
    pub fn new(registry: LivenessRegistry<S>, bindings: BindingTable<S>) -> Self {
        Self { registry, bindings }
    }

    pub fn registry(&self) -> &LivenessRegistry<S> {
        &self.registry
    }

    pub fn redundancy(&self) -> usize {
        self.bindings.redundancy()
    }

    /// Pick R live nodes for `prefix`, record the binding and return their
    /// tunnel endpoints (`host:port`) in binding order.
    ///
    /// With fewer than R live nodes nothing is written.
    pub async fn bind(&self, prefix: &str) -> Result<Vec<String>, RelayError> {
        validate_prefix(prefix)?;

        let needed = self.redundancy();
        let live = self.registry.list_live(needed).await?;
        if live.len() < needed {
            tracing::warn!(prefix, needed, found = live.len(), "not enough live workers to bind");
            return Err(RelayError::InsufficientWorkers {
                needed,
                found: live.len(),
            });
        }

        let ids: Vec<String> = live.iter().map(|r| r.worker_id.clone()).collect();
        self.bindings.create_binding(prefix, &ids).await?;
        Ok(live.iter().map(|r| r.endpoint.tunnel_endpoint()).collect())
    }

    /// The bound nodes for `prefix` that are still live, in binding order.
    ///
    /// An empty result means every bound node has lapsed.
    pub async fn resolve(&self, prefix: &str) -> Result<Vec<WorkerRecord>, RelayError> {
        let binding = self.bindings.lookup(prefix).await?;
        let mut live = Vec::with_capacity(binding.worker_ids.len());
        for worker_id in &binding.worker_ids {
            match self.registry.get(worker_id).await? {
                Some(record) => live.push(record),
                None => tracing::debug!(prefix, worker_id, "bound worker no longer live"),
            }
        }
        Ok(live)
    }
}
