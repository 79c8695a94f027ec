//! Key-value store behind the liveness registry and the binding table.
//!
//! Any store with per-key TTL and prefix enumeration fits. Two backends ship:
//! [`MemoryStore`] (process-local, used by tests and single-node setups) and
//! [`RedisStore`](crate::redis_store::RedisStore). [`AnyStore`] picks one from
//! configuration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use rendezvous_core::config::{RegistryConfig, StoreBackend};
use rendezvous_core::RelayError;

use crate::redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store command failed: {0}")]
    Command(String),
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        RelayError::StoreUnavailable(e.to_string())
    }
}

/// Single-key operations only. No transactions, no compare-and-set:
/// writers rely on the store's own single-key atomicity.
pub trait KvStore: Clone + Send + Sync + 'static {
    /// Upsert `key`. `ttl = None` keeps the key until overwritten.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read `key`. Expired keys read as `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Every live key starting with `prefix`, in no particular order.
    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

// ── Memory ────────────────────────────────────────────────────────────────────

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory store. Clones share the same map.
///
/// Expiry is evaluated lazily on read against `tokio::time::Instant`, so
/// tests can drive TTLs with a paused clock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }
}

impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect())
    }
}

// ── Selection ────────────────────────────────────────────────────────────────

/// The configured backend.
#[derive(Clone)]
pub enum AnyStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl AnyStore {
    pub async fn connect(config: &RegistryConfig) -> Result<Self, StoreError> {
        match config.backend {
            StoreBackend::Memory => Ok(AnyStore::Memory(MemoryStore::new())),
            StoreBackend::Redis => Ok(AnyStore::Redis(RedisStore::connect(&config.url).await?)),
        }
    }
}

impl KvStore for AnyStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.set(key, value, ttl).await,
            AnyStore::Redis(s) => s.set(key, value, ttl).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.get(key).await,
            AnyStore::Redis(s) => s.get(key).await,
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.scan_prefix(prefix).await,
            AnyStore::Redis(s) => s.scan_prefix(prefix).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ttl_keys_expire() {
        let store = MemoryStore::new();
        store.set("servers:a", "1", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(store.get("servers:a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("servers:a").await.unwrap(), None);
        assert!(store.scan_prefix("servers:").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_without_ttl_persist() {
        let store = MemoryStore::new();
        store.set("proxies:svc", "[]", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.get("proxies:svc").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_ttl() {
        let store = MemoryStore::new();
        store.set("k", "old", Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set("k", "new", Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let store = MemoryStore::new();
        store.set("servers:a", "1", None).await.unwrap();
        store.set("servers:b", "2", None).await.unwrap();
        store.set("proxies:x", "3", None).await.unwrap();

        let mut keys = store.scan_prefix("servers:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["servers:a", "servers:b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new();
        store.set("a", "1", Some(Duration::from_secs(1))).await.unwrap();
        store.set("b", "2", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = AnyStore::Memory(store.clone());
        other.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
