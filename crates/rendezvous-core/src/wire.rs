//! Rendezvous wire format: frames exchanged over a tunnel, plus the key
//! conventions of the shared registry store.
//!
//! A tunnel is a WebSocket carrying JSON text frames:
//!
//!   agent  → holder   Handshake     {"prefix": "<name>"}      exactly once, first
//!   holder → agent    RelayRequest  {"subpath": "<path>"}
//!   agent  → holder   payload       any JSON value
//!
//! RelayRequest and payload strictly alternate after the handshake. There is
//! no correlation id: the first payload after a request answers it.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Longest accepted prefix, in bytes.
pub const MAX_PREFIX_LEN: usize = 8;

/// Registry key namespace for liveness records.
pub const SERVERS_KEY_PREFIX: &str = "servers:";

/// Registry key namespace for prefix bindings.
pub const PROXIES_KEY_PREFIX: &str = "proxies:";

/// Relay payload. Opaque to the broker beyond being valid JSON.
pub type Payload = serde_json::Value;

// ── Frames ────────────────────────────────────────────────────────────────────

/// First frame on every tunnel, sent by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub prefix: String,
}

/// Holder → agent: fetch `subpath` from the local application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub subpath: String,
}

pub fn encode_handshake(prefix: &str) -> String {
    serde_json::json!({ "prefix": prefix }).to_string()
}

/// Parse and validate a handshake frame.
///
/// Malformed JSON, a missing `prefix` field and an invalid prefix all fail
/// with [`RelayError::MalformedHandshake`].
pub fn decode_handshake(text: &str) -> Result<Handshake, RelayError> {
    let handshake: Handshake = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedHandshake(e.to_string()))?;
    validate_prefix(&handshake.prefix)
        .map_err(|e| RelayError::MalformedHandshake(e.to_string()))?;
    Ok(handshake)
}

pub fn encode_request(subpath: &str) -> String {
    serde_json::json!({ "subpath": subpath }).to_string()
}

pub fn decode_request(text: &str) -> Result<RelayRequest, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::ProtocolViolation(e.to_string()))
}

/// Parse a reply frame. Anything that is not JSON violates the protocol.
pub fn decode_payload(text: &str) -> Result<Payload, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::ProtocolViolation(e.to_string()))
}

/// Reply sent by an agent when the local call failed, so the holder's wait
/// completes instead of timing out.
pub fn error_payload(message: &str, status: Option<u16>) -> Payload {
    serde_json::json!({ "error": message, "status": status })
}

// ── Prefixes ─────────────────────────────────────────────────────────────────

/// Accept exactly `^[a-z]{1,8}$`.
pub fn validate_prefix(prefix: &str) -> Result<(), RelayError> {
    let valid = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix.bytes().all(|b| b.is_ascii_lowercase());
    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidPrefix(prefix.to_string()))
    }
}

// ── Registry keys ────────────────────────────────────────────────────────────

pub fn servers_key(worker_id: &str) -> String {
    format!("{SERVERS_KEY_PREFIX}{worker_id}")
}

pub fn proxies_key(prefix: &str) -> String {
    format!("{PROXIES_KEY_PREFIX}{prefix}")
}

/// Inverse of [`servers_key`].
pub fn worker_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(SERVERS_KEY_PREFIX)
}
