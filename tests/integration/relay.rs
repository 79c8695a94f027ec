use serde_json::json;

use rendezvous_services::{MemoryStore, TunnelAgent};

use crate::*;

/// Two nodes, R = 2, an agent with tunnels parked on both.
async fn two_node_setup() -> (Node, Node, Vec<tokio::task::JoinHandle<()>>) {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 2).await.unwrap();
    let w2 = start_node(&store, "w2", 2).await.unwrap();
    let app = start_local_app("backend").await.unwrap();

    let agent = TunnelAgent::new(&w1.broker_url, "svc", &app).unwrap();
    let tunnels = agent.establish().await.unwrap();
    assert_eq!(tunnels.len(), 2);

    let (h1, h2) = (w1.state.holder.clone(), w2.state.holder.clone());
    wait_until("both nodes to park the tunnel", || {
        let (h1, h2) = (h1.clone(), h2.clone());
        async move { h1.get("svc").is_some() && h2.get("svc").is_some() }
    })
    .await
    .unwrap();

    (w1, w2, tunnels)
}

#[tokio::test]
async fn query_reaches_local_app_through_either_broker() {
    let (w1, w2, _tunnels) = two_node_setup().await;

    for node in [&w1, &w2] {
        let (status, body) = get_json(&format!("{}/query/status?prefix=svc", node.broker_url))
            .await
            .unwrap();
        assert_eq!(status, 200, "via {}: {body}", node.id);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    let (status, body) = get_json(&format!("{}/query/whoami?prefix=svc", w2.broker_url))
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["name"], "backend");
}

#[tokio::test]
async fn local_app_errors_come_back_as_payloads() {
    let (w1, _w2, _tunnels) = two_node_setup().await;

    let (status, body) = get_json(&format!("{}/query/no/such/path?prefix=svc", w1.broker_url))
        .await
        .unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["status"], 404);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn query_fails_over_when_first_node_goes_down() {
    let (w1, w2, _tunnels) = two_node_setup().await;

    // w1 stops serving but its registry record has not expired yet.
    w1.stop();
    let h1 = w1.state.holder.clone();
    wait_until("w1 to drop its tunnel", || {
        let h1 = h1.clone();
        async move { h1.is_empty() }
    })
    .await
    .unwrap();

    let (status, body) = get_json(&format!("{}/query/status?prefix=svc", w2.broker_url))
        .await
        .unwrap();
    assert_eq!(status, 200, "{body}");
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn query_errors_map_to_status_codes() {
    let store = MemoryStore::new();
    let w1 = start_node(&store, "w1", 1).await.unwrap();
    let base = &w1.broker_url;

    let (status, body) = get_json(&format!("{base}/query/status")).await.unwrap();
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "bad_request");

    let (status, body) = get_json(&format!("{base}/query/status?prefix=svc")).await.unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "no_binding");

    // Bound, but no agent ever connected.
    let (status, _) = post_json(
        &format!("{base}/proxy/create"),
        json!({ "prefix": "svc", "address": "a:1" }),
    )
    .await
    .unwrap();
    assert_eq!(status, 200);
    let (status, body) = get_json(&format!("{base}/query/status?prefix=svc")).await.unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "no_active_tunnel");
}

#[tokio::test]
async fn closing_the_agent_unparks_tunnels() {
    let (w1, w2, tunnels) = two_node_setup().await;
    for t in &tunnels {
        t.abort();
    }

    let (h1, h2) = (w1.state.holder.clone(), w2.state.holder.clone());
    wait_until("both tunnels to close", || {
        let (h1, h2) = (h1.clone(), h2.clone());
        async move { h1.is_empty() && h2.is_empty() }
    })
    .await
    .unwrap();

    let (status, body) = get_json(&format!("{}/query/status?prefix=svc", w1.broker_url))
        .await
        .unwrap();
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "no_active_tunnel");
}
