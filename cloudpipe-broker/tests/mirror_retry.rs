// cloudpipe-broker/tests/mirror_retry.rs
// ============================================================================
// Module: Mirror Retry Tests
// Description: Peer PATCH delivery with retries against a stub peer.
// Purpose: Verify the retry budget, success criterion, and wire format.
// Dependencies: cloudpipe-broker, axum, tokio, serde_json
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::patch;
use cloudpipe_broker::MirrorClient;
use serde_json::Value;
use serde_json::json;

/// Recorded PATCH attempts observed by the stub peer.
#[derive(Debug, Default)]
struct PeerLog {
    /// Bodies received, one per attempt.
    bodies: Vec<Value>,
    /// Authorization headers received, one per attempt.
    tokens: Vec<String>,
    /// Status the stub keeps answering until the success attempt.
    failures_before_accept: usize,
}

type SharedLog = Arc<Mutex<PeerLog>>;

/// Stub peer answering 500 until the configured attempt, then 202.
async fn stub_patch(
    State(log): State<SharedLog>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut log = log.lock().unwrap();
    log.bodies.push(body);
    log.tokens.push(
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    );
    if log.bodies.len() <= log.failures_before_accept {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::ACCEPTED
    }
}

/// Starts the stub peer and returns its address and log.
async fn start_stub(failures_before_accept: usize) -> (SocketAddr, SharedLog) {
    let log = Arc::new(Mutex::new(PeerLog {
        failures_before_accept,
        ..PeerLog::default()
    }));
    let app = Router::new().route("/peer/pipes/p1", patch(stub_patch)).with_state(Arc::clone(&log));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, log)
}

/// Waits until the log holds the wanted number of attempts or times out.
async fn wait_for_attempts(log: &SharedLog, wanted: usize) {
    for _ in 0..200 {
        if log.lock().unwrap().bodies.len() >= wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn mirror_retries_until_the_peer_accepts() {
    let (addr, log) = start_stub(3).await;
    let client = MirrorClient::with_policy(
        5,
        Duration::from_millis(10),
        Duration::from_millis(80),
    )
    .unwrap();

    client.update_other(
        "test-token".to_string(),
        format!("http://{addr}/peer/pipes/p1"),
        json!({"URI": "https://svc.example.com"}),
    );

    wait_for_attempts(&log, 4).await;
    // Settle long enough for a fifth attempt to show up if one were made.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.bodies.len(), 4);
    for body in &log.bodies {
        assert_eq!(body, &json!({"other": {"data": {"URI": "https://svc.example.com"}}}));
    }
    for token in &log.tokens {
        assert_eq!(token, "Bearer test-token");
    }
}

#[tokio::test]
async fn mirror_gives_up_after_the_retry_budget() {
    let (addr, log) = start_stub(usize::MAX).await;
    let client = MirrorClient::with_policy(
        3,
        Duration::from_millis(10),
        Duration::from_millis(40),
    )
    .unwrap();

    client.update_other(
        "test-token".to_string(),
        format!("http://{addr}/peer/pipes/p1"),
        json!({"X": "1"}),
    );

    wait_for_attempts(&log, 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.lock().unwrap().bodies.len(), 3);
}

#[tokio::test]
async fn non_accepted_success_statuses_are_retried() {
    // 200 OK is not the mirror success criterion; only 202 stops the loop.
    let log: SharedLog = Arc::new(Mutex::new(PeerLog::default()));
    let app = Router::new()
        .route(
            "/peer/pipes/p1",
            patch(|State(log): State<SharedLog>, Json(body): Json<Value>| async move {
                log.lock().unwrap().bodies.push(body);
                StatusCode::OK
            }),
        )
        .with_state(Arc::clone(&log));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = MirrorClient::with_policy(
        2,
        Duration::from_millis(10),
        Duration::from_millis(20),
    )
    .unwrap();
    client.update_other(
        "test-token".to_string(),
        format!("http://{addr}/peer/pipes/p1"),
        json!({"X": "1"}),
    );

    wait_for_attempts(&log, 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.lock().unwrap().bodies.len(), 2);
}
