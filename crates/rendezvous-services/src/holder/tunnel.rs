//! One parked tunnel, as seen by the relay side.
//!
//! The frame protocol has no correlation id, so exchanges on a tunnel are
//! strictly one at a time: callers queue on the inbox mutex. If a caller
//! gives up while its reply is still in flight, the tunnel remembers that it
//! is owed a reply and the next exchange throws that reply away.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex};

use rendezvous_core::wire::{encode_request, Payload};
use rendezvous_core::RelayError;

struct Inbox {
    replies: mpsc::Receiver<Payload>,
    /// Requests already sent whose replies have not been consumed.
    owed: usize,
}

pub struct Tunnel {
    id: u64,
    prefix: String,
    peer: SocketAddr,
    connected_at: Instant,
    outbound: mpsc::Sender<String>,
    inbox: Mutex<Inbox>,
}

impl Tunnel {
    pub fn new(
        id: u64,
        prefix: String,
        peer: SocketAddr,
        outbound: mpsc::Sender<String>,
        replies: mpsc::Receiver<Payload>,
    ) -> Self {
        Self {
            id,
            prefix,
            peer,
            connected_at: Instant::now(),
            outbound,
            inbox: Mutex::new(Inbox { replies, owed: 0 }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// True while an exchange holds the tunnel.
    pub fn is_busy(&self) -> bool {
        self.inbox.try_lock().is_err()
    }

    /// Send `{"subpath"}` and wait for the reply.
    ///
    /// `timeout` bounds the whole call, time spent queued behind other
    /// exchanges included.
    pub async fn exchange(&self, subpath: &str, timeout: Duration) -> Result<Payload, RelayError> {
        let deadline = tokio::time::Instant::now() + timeout;

        let mut inbox = tokio::time::timeout_at(deadline, self.inbox.lock())
            .await
            .map_err(|_| self.timed_out(timeout))?;

        // Anything already buffered predates this request. A frame we owe a
        // skip for settles one debt; anything else was never asked for.
        loop {
            match inbox.replies.try_recv() {
                Ok(_) if inbox.owed > 0 => {
                    inbox.owed -= 1;
                    tracing::debug!(prefix = %self.prefix, "discarding stale reply");
                }
                Ok(_) => tracing::warn!(prefix = %self.prefix, "discarding unsolicited frame"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(self.closed()),
            }
        }

        let frame = encode_request(subpath);
        match tokio::time::timeout_at(deadline, self.outbound.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(self.closed()),
            Err(_) => return Err(self.timed_out(timeout)),
        }
        // Counted before waiting, so a caller dropped mid-wait still leaves
        // its reply on the books for the next exchange to skip.
        inbox.owed += 1;

        loop {
            match tokio::time::timeout_at(deadline, inbox.replies.recv()).await {
                Ok(Some(payload)) => {
                    inbox.owed -= 1;
                    if inbox.owed == 0 {
                        return Ok(payload);
                    }
                    tracing::debug!(prefix = %self.prefix, "discarding late reply");
                }
                Ok(None) => return Err(self.closed()),
                Err(_) => {
                    tracing::warn!(prefix = %self.prefix, owed = inbox.owed, "relay exchange timed out");
                    return Err(self.timed_out(timeout));
                }
            }
        }
    }

    fn closed(&self) -> RelayError {
        RelayError::TunnelClosed(self.prefix.clone())
    }

    fn timed_out(&self, after: Duration) -> RelayError {
        RelayError::Timeout {
            prefix: self.prefix.clone(),
            after,
        }
    }
}
