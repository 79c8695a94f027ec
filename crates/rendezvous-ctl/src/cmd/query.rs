//! Query a local application through the broker.

use anyhow::Result;

use super::http::get_json;

pub async fn cmd_query(broker: &str, prefix: &str, subpath: &str) -> Result<()> {
    let subpath = subpath.trim_start_matches('/');
    let url = format!("{broker}/query/{subpath}?prefix={prefix}");
    let body: serde_json::Value = get_json(&url).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
