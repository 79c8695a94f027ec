//! Configuration system for rendezvous.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RENDEZVOUS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rendezvous/config.toml
//!   3. ~/.config/rendezvous/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::record::WorkerEndpoint;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub relay: RelayConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Registry identity. Empty = "<advertise_host>:<tunnel_port>".
    pub worker_id: String,
    /// Host other nodes and agents use to reach this node.
    pub advertise_host: String,
    /// Interface all listeners bind to.
    pub bind_host: String,
    pub broker_port: u16,
    pub receiver_port: u16,
    pub tunnel_port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store. Only useful for a single node or tests.
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: StoreBackend,
    /// Store URL, e.g. redis://host:6379. Ignored by the memory backend.
    pub url: String,
    /// Liveness record TTL.
    pub ttl_secs: u64,
    /// Heartbeat period. 0 = ttl / 2.
    pub heartbeat_interval_secs: u64,
    /// Bound on every individual store call.
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Redundancy factor R: nodes bound per prefix.
    pub redundancy: usize,
    /// Bound on one relay exchange, queueing included.
    pub timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Concurrent tunnels accepted by one node.
    pub max_tunnels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub broker_url: String,
    /// Bound on one call to the local application.
    pub local_timeout_secs: u64,
    /// Pause before re-binding once every tunnel has dropped.
    pub reconnect_delay_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            advertise_host: "127.0.0.1".to_string(),
            bind_host: "0.0.0.0".to_string(),
            broker_port: 5000,
            receiver_port: 5001,
            tunnel_port: 8765,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            ttl_secs: 10,
            heartbeat_interval_secs: 0,
            op_timeout_ms: 2_000,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redundancy: 2,
            timeout_secs: 30,
            handshake_timeout_secs: 10,
            max_tunnels: 1024,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://127.0.0.1:5000".to_string(),
            local_timeout_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl NodeConfig {
    pub fn worker_id(&self) -> String {
        if self.worker_id.is_empty() {
            format!("{}:{}", self.advertise_host, self.tunnel_port)
        } else {
            self.worker_id.clone()
        }
    }

    pub fn endpoint(&self) -> WorkerEndpoint {
        WorkerEndpoint {
            host: self.advertise_host.clone(),
            tunnel_port: self.tunnel_port,
            receiver_port: self.receiver_port,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(1))
    }

    /// Heartbeats run at half the TTL unless configured otherwise, so one
    /// late tick does not let the record lapse.
    pub fn heartbeat_interval(&self) -> Duration {
        if self.heartbeat_interval_secs == 0 {
            self.ttl() / 2
        } else {
            Duration::from_secs(self.heartbeat_interval_secs)
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl AgentConfig {
    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// `$XDG_CONFIG_HOME/rendezvous`, falling back to `$HOME/.config/rendezvous`.
/// Nodes started without a home directory share `/tmp/.config/rendezvous`.
fn config_dir() -> PathBuf {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(".config"),
    };
    base.join("rendezvous")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RendezvousConfig {
    /// Node and agent settings. A missing file yields the defaults (memory
    /// registry, redundancy 2, ports 5000/5001/8765); `RENDEZVOUS_*`
    /// variables win over both.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RendezvousConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// `$RENDEZVOUS_CONFIG` if set, so several nodes on one machine can each
    /// point at their own file.
    pub fn file_path() -> PathBuf {
        std::env::var("RENDEZVOUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Seed the config file with the defaults on a node's first start.
    /// An existing file is never touched.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RendezvousConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RENDEZVOUS_NODE__WORKER_ID") {
            self.node.worker_id = v;
        }
        if let Some(v) = lookup("RENDEZVOUS_NODE__ADVERTISE_HOST") {
            self.node.advertise_host = v;
        }
        if let Some(p) = lookup("RENDEZVOUS_NODE__BROKER_PORT").and_then(|v| v.parse().ok()) {
            self.node.broker_port = p;
        }
        if let Some(p) = lookup("RENDEZVOUS_NODE__RECEIVER_PORT").and_then(|v| v.parse().ok()) {
            self.node.receiver_port = p;
        }
        if let Some(p) = lookup("RENDEZVOUS_NODE__TUNNEL_PORT").and_then(|v| v.parse().ok()) {
            self.node.tunnel_port = p;
        }
        if let Some(v) = lookup("RENDEZVOUS_REGISTRY__BACKEND") {
            match v.as_str() {
                "memory" => self.registry.backend = StoreBackend::Memory,
                "redis" => self.registry.backend = StoreBackend::Redis,
                _ => {}
            }
        }
        if let Some(v) = lookup("RENDEZVOUS_REGISTRY__URL") {
            self.registry.url = v;
        }
        if let Some(r) = lookup("RENDEZVOUS_RELAY__REDUNDANCY").and_then(|v| v.parse().ok()) {
            self.relay.redundancy = r;
        }
        if let Some(v) = lookup("RENDEZVOUS_AGENT__BROKER_URL") {
            self.agent.broker_url = v;
        }
    }
}
