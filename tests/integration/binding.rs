use serde_json::json;

use rendezvous_services::{KvStore, MemoryStore};

use crate::*;

#[tokio::test]
async fn bind_returns_one_endpoint_per_node() {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 2).await.unwrap();
    let _w2 = start_node(&store, "w2", 2).await.unwrap();

    let (status, body) = post_json(
        &format!("{}/proxy/create", w1.broker_url),
        json!({ "prefix": "svc", "address": "127.0.0.1:8080" }),
    )
    .await
    .unwrap();
    assert_eq!(status, 200, "{body}");

    let workers = body["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 2);
    assert_ne!(workers[0], workers[1]);
}

#[tokio::test]
async fn bind_with_one_node_is_refused() {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 2).await.unwrap();

    let (status, body) = post_json(
        &format!("{}/proxy/create", w1.broker_url),
        json!({ "prefix": "svc", "address": "127.0.0.1:8080" }),
    )
    .await
    .unwrap();
    assert_eq!(status, 500);
    assert_eq!(body["kind"], "insufficient_workers");
    assert!(store.scan_prefix("proxies:").await.unwrap().is_empty());
}

#[tokio::test]
async fn bind_rejects_malformed_requests() {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 1).await.unwrap();
    let url = format!("{}/proxy/create", w1.broker_url);

    let (status, _) = post_json(&url, json!({ "address": "a:1" })).await.unwrap();
    assert_eq!(status, 400);
    let (status, _) = post_json(&url, json!({ "prefix": "svc" })).await.unwrap();
    assert_eq!(status, 400);
    let (status, body) = post_json(&url, json!({ "prefix": "a1", "address": "a:1" })).await.unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "invalid_prefix");
}

#[tokio::test]
async fn status_lists_registry_and_tunnels() {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 1).await.unwrap();

    let (status, body) = get_json(&format!("{}/status", w1.broker_url)).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["node_id"], w1.id.as_str());
    assert_eq!(body["live_workers"], 1);
    assert_eq!(body["tunnels"], json!([]));
}
