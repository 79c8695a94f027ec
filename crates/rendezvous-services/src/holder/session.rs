//! Per-connection tunnel session.
//!
//! CONNECTING: wait for the `{"prefix"}` handshake.
//! REGISTERED: park the tunnel in the holder, then pump frames in both
//! directions until the peer leaves, breaks protocol, or we shut down.
//! CLOSED: unpark (only if still ours) and fail any waiting exchange.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use rendezvous_core::wire::{decode_handshake, decode_payload, Handshake, Payload};
use rendezvous_core::RelayError;

use super::tunnel::Tunnel;
use super::ConnectionHolder;

/// Requests are strictly serialized per tunnel, so a handful is plenty.
const OUTBOUND_QUEUE: usize = 8;
/// Replies beyond this many unconsumed frames are dropped.
const REPLY_QUEUE: usize = 32;

type WsStream = WebSocketStream<TcpStream>;

/// Drive one accepted WebSocket through its whole lifecycle.
pub async fn run_session(
    ws: WsStream,
    peer: SocketAddr,
    holder: Arc<ConnectionHolder>,
    handshake_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let handshake = match tokio::time::timeout(handshake_timeout, read_handshake(&mut ws_rx)).await {
        Ok(Ok(h)) => h,
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "rejecting tunnel");
            let _ = ws_tx.send(Message::Close(None)).await;
            return Err(e);
        }
        Err(_) => {
            tracing::warn!(peer = %peer, "no handshake before deadline");
            let _ = ws_tx.send(Message::Close(None)).await;
            return Err(RelayError::MalformedHandshake(format!(
                "no handshake within {handshake_timeout:?}"
            )));
        }
    };

    let prefix = handshake.prefix;
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let (reply_tx, reply_rx) = mpsc::channel::<Payload>(REPLY_QUEUE);
    let tunnel = Arc::new(Tunnel::new(
        holder.next_tunnel_id(),
        prefix.clone(),
        peer,
        out_tx,
        reply_rx,
    ));
    let id = tunnel.id();

    if let Some(previous) = holder.register(tunnel) {
        tracing::info!(
            prefix,
            peer = %peer,
            superseded = previous.id(),
            superseded_peer = %previous.peer(),
            "tunnel superseded, previous connection left orphaned"
        );
    }
    tracing::info!(prefix, peer = %peer, id, "tunnel registered");

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => break Ok(()),

            Some(frame) = out_rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                    tracing::debug!(prefix, error = %e, "tunnel write failed");
                    break Err(RelayError::TunnelClosed(prefix.clone()));
                }
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(prefix, error = %e, "tunnel read failed");
                        break Err(RelayError::TunnelClosed(prefix.clone()));
                    }
                    None => break Ok(()),
                };
                match msg {
                    Message::Text(text) => match decode_payload(&text) {
                        Ok(payload) => {
                            if reply_tx.try_send(payload).is_err() {
                                tracing::warn!(prefix, "reply queue full, dropping frame");
                            }
                        }
                        Err(e) => break Err(e),
                    },
                    Message::Binary(_) => {
                        break Err(RelayError::ProtocolViolation("binary frame on tunnel".into()));
                    }
                    Message::Ping(data) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => break Ok(()),
                    _ => continue,
                }
            }
        }
    };

    holder.remove_if_current(&prefix, id);
    // Waiting exchanges see the channel close and fail with TunnelClosed.
    drop(reply_tx);
    let _ = ws_tx.send(Message::Close(None)).await;

    match &result {
        Ok(()) => tracing::info!(prefix, peer = %peer, id, "tunnel closed"),
        Err(e) => tracing::warn!(prefix, peer = %peer, id, error = %e, "tunnel terminated"),
    }
    result
}

async fn read_handshake(ws_rx: &mut SplitStream<WsStream>) -> Result<Handshake, RelayError> {
    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => return decode_handshake(&text),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(RelayError::MalformedHandshake("closed before handshake".into()))
            }
            Some(Ok(_)) => {
                return Err(RelayError::MalformedHandshake("handshake must be a text frame".into()))
            }
            Some(Err(e)) => return Err(RelayError::MalformedHandshake(e.to_string())),
        }
    }
}
