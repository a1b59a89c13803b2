//! HTTP-surface integration tests for causal-consistency broadcast.

use std::collections::HashMap;

use axum::body::{self, Body};
use axum::http::Request;
use coord_cluster::config::TimingConfig;
use coord_cluster::core::Engine;
use coord_cluster::core::causal::CausalEngine;
use coord_cluster::core::peer::PeerClient;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(self_id: u64, ids: &[u64]) -> axum::Router {
    let peers: HashMap<u64, String> = ids.iter().map(|&id| (id, format!("host-{id}:8000"))).collect();
    let peer = PeerClient::new(self_id, peers);
    CausalEngine::new(peer, &TimingConfig::default()).routes()
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
async fn posting_locally_delivers_immediately_and_advances_the_clock() {
    let app = router(1, &[1, 2, 3]);
    let event = post(app.clone(), "/post", json!({"author": "alice", "text": "hi"})).await;
    assert_eq!(event["vector_clock"], json!([1, 0, 0]));

    let status = get(app, "/status").await;
    assert_eq!(status["delivered_post_count"], json!(1));
    assert_eq!(status["buffered_count"], json!(0));
}

#[tokio::test]
async fn a_reply_whose_parent_has_not_arrived_is_buffered_with_a_reason() {
    let app = router(2, &[1, 2, 3]);
    let reply = json!({
        "origin_id": 1,
        "event_id": "1-2",
        "parent_event_id": "1-1",
        "author": "bob",
        "text": "reply",
        "vector_clock": [2, 0, 0],
    });
    post(app.clone(), "/share", reply).await;

    let dump = get(app.clone(), "/debug").await;
    let buffered = dump["buffered"].as_array().unwrap();
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0]["reason"], json!("missing parent"));

    let status = get(app, "/status").await;
    assert_eq!(status["buffered_count"], json!(1));
}

#[tokio::test]
async fn parent_arrival_drains_its_buffered_reply() {
    let app = router(2, &[1, 2, 3]);
    let reply = json!({
        "origin_id": 1,
        "event_id": "1-2",
        "parent_event_id": "1-1",
        "author": "bob",
        "text": "reply",
        "vector_clock": [2, 0, 0],
    });
    post(app.clone(), "/share", reply).await;

    let post_event = json!({
        "origin_id": 1,
        "event_id": "1-1",
        "parent_event_id": null,
        "author": "bob",
        "text": "post",
        "vector_clock": [1, 0, 0],
    });
    post(app.clone(), "/share", post_event).await;

    let status = get(app, "/status").await;
    assert_eq!(status["buffered_count"], json!(0));
    assert_eq!(status["delivered_post_count"], json!(1));
}
