//! Error taxonomy shared by the registry, the binding table and the relay.

use std::time::Duration;

/// Every failure a broker operation can surface.
///
/// The HTTP layer maps each variant to a status code and reports
/// [`RelayError::kind`] in the JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The registry / binding-table backend could not be reached, timed out,
    /// or returned data that could not be interpreted.
    #[error("registry store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not enough live workers: need {needed}, found {found}")]
    InsufficientWorkers { needed: usize, found: usize },

    #[error("no binding for prefix {0}")]
    NoBinding(String),

    #[error("no active tunnel for prefix {0}")]
    NoActiveTunnel(String),

    #[error("tunnel for prefix {0} closed mid-exchange")]
    TunnelClosed(String),

    /// The node holding the tunnel could not be reached over HTTP.
    #[error("relay receiver unavailable: {0}")]
    ReceiverUnavailable(String),

    #[error("no reply on tunnel for prefix {prefix} within {after:?}")]
    Timeout { prefix: String, after: Duration },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid prefix {0:?}: must be 1-8 lowercase ascii letters")]
    InvalidPrefix(String),
}

impl RelayError {
    /// Stable snake_case name, used as the `kind` field of HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::StoreUnavailable(_) => "store_unavailable",
            RelayError::InsufficientWorkers { .. } => "insufficient_workers",
            RelayError::NoBinding(_) => "no_binding",
            RelayError::NoActiveTunnel(_) => "no_active_tunnel",
            RelayError::TunnelClosed(_) => "tunnel_closed",
            RelayError::ReceiverUnavailable(_) => "receiver_unavailable",
            RelayError::Timeout { .. } => "timeout",
            RelayError::MalformedHandshake(_) => "malformed_handshake",
            RelayError::ProtocolViolation(_) => "protocol_violation",
            RelayError::InvalidPrefix(_) => "invalid_prefix",
        }
    }

    /// Parse a kind string back into a coarse variant. Used by the broker to
    /// re-raise errors reported by a remote receiver.
    pub fn from_kind(kind: &str, prefix: &str, message: String) -> Option<Self> {
        let err = match kind {
            "store_unavailable" => RelayError::StoreUnavailable(message),
            "no_binding" => RelayError::NoBinding(prefix.to_string()),
            "no_active_tunnel" => RelayError::NoActiveTunnel(prefix.to_string()),
            "tunnel_closed" => RelayError::TunnelClosed(prefix.to_string()),
            "receiver_unavailable" => RelayError::ReceiverUnavailable(message),
            "protocol_violation" => RelayError::ProtocolViolation(message),
            "malformed_handshake" => RelayError::MalformedHandshake(message),
            "invalid_prefix" => RelayError::InvalidPrefix(prefix.to_string()),
            _ => return None,
        };
        Some(err)
    }
}
