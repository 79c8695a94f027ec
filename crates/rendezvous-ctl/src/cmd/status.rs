//! Broker node status.

use anyhow::Result;
use serde::Deserialize;

use super::http::get_json;

#[derive(Deserialize)]
struct StatusResponse {
    node_id: String,
    redundancy: usize,
    live_workers: Option<usize>,
    tunnels: Vec<TunnelInfo>,
}

#[derive(Deserialize)]
struct TunnelInfo {
    prefix: String,
    peer: String,
    connected_secs: u64,
    busy: bool,
}

pub async fn cmd_status(broker: &str) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{broker}/status")).await?;

    println!("═══════════════════════════════════════");
    println!("  Rendezvous Node Status");
    println!("═══════════════════════════════════════");
    println!("  Node id        : {}", resp.node_id);
    println!("  Redundancy     : {}", resp.redundancy);
    match resp.live_workers {
        Some(n) => println!("  Live workers   : {}", n),
        None => println!("  Live workers   : unknown (registry unavailable)"),
    }
    println!("  Parked tunnels : {}", resp.tunnels.len());

    if resp.tunnels.is_empty() {
        println!("\n  No parked tunnels.");
    } else {
        println!("\n  Tunnels:");
        for t in &resp.tunnels {
            println!("  ┌─ {}", t.prefix);
            println!("  │  peer   : {}", t.peer);
            println!("  │  busy   : {}", t.busy);
            println!("  └─ uptime : {}s", t.connected_secs);
        }
    }

    Ok(())
}
