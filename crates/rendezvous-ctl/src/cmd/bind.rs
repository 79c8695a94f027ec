//! Bind a prefix without running an agent.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::post_json_body;

#[derive(Serialize)]
struct CreateRequest<'a> {
    prefix: &'a str,
    address: &'a str,
}

#[derive(Deserialize)]
struct CreateResponse {
    workers: Vec<String>,
}

pub async fn cmd_bind(broker: &str, prefix: &str, address: &str) -> Result<()> {
    let resp: CreateResponse = post_json_body(
        &format!("{broker}/proxy/create"),
        &CreateRequest { prefix, address },
    )
    .await?;

    println!("Bound '{}' to {} worker(s):", prefix, resp.workers.len());
    for w in &resp.workers {
        println!("  ws://{w}");
    }
    Ok(())
}
