// cloudpipe-broker/tests/peer_mirror_e2e.rs
// ============================================================================
// Module: Peer Mirror End-to-End Tests
// Description: Two live brokers exchanging pipe data through mirror PATCHes.
// Purpose: Verify a local change propagates to the peer's stored pipe.
// Dependencies: cloudpipe-broker, axum, tokio, reqwest
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use cloudpipe_broker::AppState;
use cloudpipe_broker::ServerConfig;
use cloudpipe_broker::router;
use cloudpipe_core::Resource;
use cloudpipe_core::ResourceRegistry;
use serde_json::Value;
use serde_json::json;

use common::basic_auth;

/// Starts a broker over one bare resource and returns its prefix.
async fn start_broker(resource_id: &str) -> (Arc<AppState>, String) {
    let registry = Arc::new(ResourceRegistry::new(vec![Resource::new(resource_id)]));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let prefix = format!("http://{addr}");
    let config = ServerConfig {
        port: addr.port(),
        prefix: prefix.clone(),
    };
    let state = Arc::new(AppState::new(registry, config).unwrap());
    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (state, prefix)
}

#[tokio::test]
async fn local_change_is_mirrored_into_the_peer_pipe() {
    let (_state_a, prefix_a) = start_broker("frontend").await;
    let (_state_b, prefix_b) = start_broker("db").await;
    let http = reqwest::Client::new();

    // Each owner preimages the pipe, pointing other at the opposite broker.
    let response = http
        .post(format!("{prefix_b}/db/pipes"))
        .header("authorization", basic_auth())
        .json(&json!({
            "id": "p1",
            "other": {"issuer": prefix_a, "uri": format!("{prefix_a}/frontend/pipes/p1")},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = http
        .post(format!("{prefix_a}/frontend/pipes"))
        .header("authorization", basic_auth())
        .json(&json!({
            "id": "p1",
            "other": {"issuer": prefix_b, "uri": format!("{prefix_b}/db/pipes/p1")},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    // The owner of A publishes local data; A mirrors it to B on its own.
    let response = http
        .patch(format!("{prefix_a}/frontend/pipes/p1"))
        .header("authorization", basic_auth())
        .json(&json!({"this": {"data": {"AUD": "db", "SUB": "frontend"}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    // B's stored pipe eventually carries the mirrored data on its other end.
    let mut mirrored = Value::Null;
    for _ in 0..100 {
        let stored: Value = http
            .get(format!("{prefix_b}/db/pipes/p1"))
            .header("authorization", basic_auth())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stored["other"].get("data").is_some() {
            mirrored = stored["other"]["data"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(mirrored, json!({"AUD": "db", "SUB": "frontend"}));
}
