//! HTTP-surface integration tests for eventual-consistency gossip.

use std::collections::HashMap;

use axum::body::{self, Body};
use axum::http::Request;
use coord_cluster::config::TimingConfig;
use coord_cluster::core::Engine;
use coord_cluster::core::gossip::GossipEngine;
use coord_cluster::core::peer::PeerClient;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(self_id: u64, ids: &[u64]) -> axum::Router {
    let peers: HashMap<u64, String> = ids.iter().map(|&id| (id, format!("host-{id}:8000"))).collect();
    let peer = PeerClient::new(self_id, peers);
    GossipEngine::new(peer, &TimingConfig::default()).routes()
}

async fn post(router: axum::Router, path: &str, body_json: Value) -> Value {
    let resp = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body_json.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(router: axum::Router, path: &str) -> Value {
    let resp = router
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn orphan_reply_is_visible_immediately_via_debug_dump() {
    let app = router(3, &[1, 2, 3]);
    let reply = json!({
        "origin_id": 2,
        "event_id": "2-1",
        "parent_event_id": "p1",
        "author": "bob",
        "text": "reply",
        "timestamp": 5,
    });
    post(app.clone(), "/share", reply).await;

    let dump = get(app.clone(), "/debug").await;
    assert_eq!(dump["orphan_parents"].as_array().unwrap().len(), 1);

    let status = get(app, "/status").await;
    assert_eq!(status["reply_count"], json!(1));
}

#[tokio::test]
async fn posting_locally_applies_immediately_and_advances_the_clock() {
    let app = router(1, &[1, 2, 3]);
    let event = post(app.clone(), "/post", json!({"author": "alice", "text": "hi"})).await;
    assert_eq!(event["timestamp"], json!(1));

    let status = get(app, "/status").await;
    assert_eq!(status["clock"], json!(1));
    assert_eq!(status["post_count"], json!(1));
}

#[tokio::test]
async fn parent_arrival_clears_the_orphan_bucket() {
    let app = router(3, &[1, 2, 3]);
    let reply = json!({
        "origin_id": 2, "event_id": "2-1", "parent_event_id": "p1",
        "author": "bob", "text": "reply", "timestamp": 5,
    });
    post(app.clone(), "/share", reply).await;

    let parent = json!({
        "origin_id": 1, "event_id": "p1", "parent_event_id": null,
        "author": "alice", "text": "post", "timestamp": 3,
    });
    post(app.clone(), "/share", parent).await;

    let dump = get(app, "/debug").await;
    assert!(dump["orphan_parents"].as_array().unwrap().is_empty());
}
