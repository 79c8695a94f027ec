//! Tunnel agent: runs next to a private HTTP application and keeps it
//! reachable through the broker.
//!
//! The agent asks a broker to bind its prefix, dials every returned tunnel
//! endpoint, announces the prefix, then answers each `{"subpath"}` request by
//! calling the local application.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rendezvous_core::wire::{decode_request, encode_handshake, error_payload, validate_prefix, Payload};

type AgentStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    prefix: &'a str,
    address: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    workers: Vec<String>,
}

#[derive(Clone)]
pub struct TunnelAgent {
    http: reqwest::Client,
    broker_url: String,
    prefix: String,
    local_base: String,
    local_timeout: Duration,
    reconnect_delay: Duration,
}

impl TunnelAgent {
    /// `local_base` is the application's base URL, e.g. `http://127.0.0.1:8080`.
    pub fn new(broker_url: &str, prefix: &str, local_base: &str) -> Result<Self> {
        validate_prefix(prefix)?;
        Ok(Self {
            http: reqwest::Client::new(),
            broker_url: broker_url.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
            local_base: local_base.trim_end_matches('/').to_string(),
            local_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        })
    }

    pub fn with_local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Ask the broker to bind our prefix. Returns the tunnel endpoints.
    pub async fn bind(&self) -> Result<Vec<String>> {
        let url = format!("{}/proxy/create", self.broker_url);
        let resp = self
            .http
            .post(&url)
            .json(&CreateRequest {
                prefix: &self.prefix,
                address: &self.local_base,
            })
            .send()
            .await
            .with_context(|| format!("failed to reach broker at {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("broker refused binding ({status}): {body}");
        }
        let created: CreateResponse = resp.json().await.context("bad /proxy/create response")?;
        tracing::info!(prefix = %self.prefix, workers = ?created.workers, "prefix bound");
        Ok(created.workers)
    }

    /// Dial one tunnel endpoint (`host:port`) and announce our prefix.
    pub async fn attach(&self, endpoint: &str) -> Result<JoinHandle<()>> {
        let url = format!("ws://{endpoint}");
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to dial tunnel endpoint {endpoint}"))?;
        ws.send(Message::Text(encode_handshake(&self.prefix)))
            .await
            .context("failed to send handshake")?;
        tracing::info!(prefix = %self.prefix, endpoint, "tunnel established");

        let agent = self.clone();
        let endpoint = endpoint.to_string();
        Ok(tokio::spawn(async move {
            if let Err(e) = agent.serve_tunnel(ws).await {
                tracing::warn!(prefix = %agent.prefix, endpoint, error = %e, "tunnel ended with error");
            } else {
                tracing::info!(prefix = %agent.prefix, endpoint, "tunnel closed");
            }
        }))
    }

    /// Bind, then attach to every returned endpoint.
    ///
    /// One endpoint failing to dial does not stop the others; only zero
    /// established tunnels is an error.
    pub async fn establish(&self) -> Result<Vec<JoinHandle<()>>> {
        let endpoints = self.bind().await?;
        let mut tunnels = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            match self.attach(endpoint).await {
                Ok(handle) => tunnels.push(handle),
                Err(e) => tracing::warn!(prefix = %self.prefix, endpoint, error = %e, "skipping endpoint"),
            }
        }
        if tunnels.is_empty() {
            bail!("no tunnel could be established for prefix {}", self.prefix);
        }
        Ok(tunnels)
    }

    /// Keep tunnels up until shutdown: establish, wait for every tunnel to
    /// drop, pause, bind again.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            let tunnels = match self.establish().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(prefix = %self.prefix, error = %e, "establish failed");
                    Vec::new()
                }
            };
            let aborts: Vec<_> = tunnels.iter().map(|t| t.abort_handle()).collect();

            tokio::select! {
                _ = shutdown.recv() => {
                    aborts.iter().for_each(|a| a.abort());
                    tracing::info!(prefix = %self.prefix, "agent shutting down");
                    return Ok(());
                }
                _ = futures_util::future::join_all(tunnels) => {
                    tracing::info!(prefix = %self.prefix, "all tunnels down");
                }
            }

            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn serve_tunnel(&self, mut ws: AgentStream) -> Result<()> {
        while let Some(msg) = ws.next().await {
            let text = match msg.context("tunnel read failed")? {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    ws.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };

            let reply = match decode_request(&text) {
                Ok(req) => {
                    tracing::debug!(prefix = %self.prefix, subpath = %req.subpath, "relay request");
                    fetch_local(&self.http, &self.local_base, &req.subpath, self.local_timeout).await
                }
                Err(e) => error_payload(&e.to_string(), None),
            };
            ws.send(Message::Text(reply.to_string())).await.context("tunnel write failed")?;
        }
        Ok(())
    }
}

/// `GET <base>/<subpath>` on the local application.
///
/// Never fails: a transport error, a non-2xx status or a non-JSON body all
/// become an error payload so the relay side gets an answer.
pub async fn fetch_local(
    http: &reqwest::Client,
    base: &str,
    subpath: &str,
    timeout: Duration,
) -> Payload {
    let url = format!("{}/{}", base, subpath.trim_start_matches('/'));
    let resp = match http.get(&url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(url, error = %e, "local application unreachable");
            return error_payload(&format!("local request failed: {e}"), None);
        }
    };

    let status = resp.status();
    if !status.is_success() {
        return error_payload(
            &format!("local application returned {status}"),
            Some(status.as_u16()),
        );
    }
    match resp.json::<Payload>().await {
        Ok(body) => body,
        Err(e) => error_payload(
            &format!("local application returned non-JSON body: {e}"),
            Some(status.as_u16()),
        ),
    }
}
