// cloudpipe-broker/tests/lifecycle.rs
// ============================================================================
// Module: Pipe Lifecycle Tests
// Description: Create, fill, validate, and delete behavior over HTTP.
// Purpose: Exercise merge semantics, schema enforcement, and slot release.
// Dependencies: cloudpipe-broker, axum, tower, serde_json
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions."
)]

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::bare_request;
use common::json_request;
use common::sample_app;
use common::send;
use common::send_json;

#[tokio::test]
async fn patch_merges_other_data_across_requests() {
    let app = sample_app();
    let (status, _, _) = send_json(
        &app,
        json_request("POST", "/frontend/pipes", &json!({"id": "p1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send(
        &app,
        json_request("PATCH", "/frontend/pipes/p1", &json!({"other": {"data": {"X": "1"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _, _) = send(
        &app,
        json_request("PATCH", "/frontend/pipes/p1", &json!({"other": {"data": {"Y": "2"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, _, body) = send_json(&app, bare_request("GET", "/frontend/pipes/p1")).await;
    assert_eq!(body["other"]["data"], json!({"X": "1", "Y": "2"}));
}

#[tokio::test]
async fn patch_rejects_schema_violations_and_keeps_stored_pipe() {
    let app = sample_app();
    // The db binding composes a postgresqls schema for the other end.
    let (status, _, _) = send_json(
        &app,
        json_request("POST", "/frontend/needs/db/bindings", &json!({"pipe": {"id": "p1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = send(
        &app,
        json_request(
            "PATCH",
            "/frontend/pipes/p1",
            &json!({"other": {"data": {"URI": "ftp://host/db"}}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("does not match schema"));

    // The stored pipe is unchanged by the rejected write.
    let (_, _, stored) = send_json(&app, bare_request("GET", "/frontend/pipes/p1")).await;
    assert!(stored["other"].get("data").is_none());

    let (status, _, _) = send(
        &app,
        json_request(
            "PATCH",
            "/frontend/pipes/p1",
            &json!({"other": {"data": {"URI": "postgresqls://host/db"}}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (_, _, stored) = send_json(&app, bare_request("GET", "/frontend/pipes/p1")).await;
    assert_eq!(stored["other"]["data"]["URI"], "postgresqls://host/db");
}

#[tokio::test]
async fn raw_pipe_conflicts_on_duplicate_id() {
    let app = sample_app();
    let (status, _, _) =
        send_json(&app, json_request("POST", "/frontend/pipes", &json!({"id": "p1"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) =
        send(&app, json_request("POST", "/frontend/pipes", &json!({"id": "p1"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("Pipe 'p1' already exists"));
}

#[tokio::test]
async fn raw_pipe_keeps_peer_fields_from_the_owner() {
    let app = sample_app();
    let (status, _, body) = send_json(
        &app,
        json_request(
            "POST",
            "/frontend/pipes",
            &json!({
                "id": "inbound",
                "other": {"issuer": "http://localhost:8001", "uri": "http://localhost:8001/db/pipes/inbound"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["other"]["issuer"], "http://localhost:8001");
    // The local identity is still assigned by the server.
    assert_eq!(body["this"]["uri"], "http://localhost:8000/frontend/pipes/inbound");
}

#[tokio::test]
async fn delete_removes_pipe_and_releases_the_slot() {
    let app = sample_app();
    let (status, _, _) = send_json(
        &app,
        json_request("POST", "/frontend/needs/db/bindings", &json!({"pipe": {"id": "p1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send(&app, bare_request("DELETE", "/frontend/pipes/p1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, bare_request("GET", "/frontend/pipes/p1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The released slot admits a new binding.
    let (status, _, _) = send_json(
        &app,
        json_request("POST", "/frontend/needs/db/bindings", &json!({"pipe": {"id": "p2"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send(&app, bare_request("DELETE", "/frontend/pipes/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_bindings_respect_the_slot_bound() {
    let app = sample_app();
    // The bulk need admits three pipes; race eight distinct bindings.
    let handles: Vec<_> = (0..8)
        .map(|index| {
            let app = app.clone();
            tokio::spawn(async move {
                let (status, _, _) = send(
                    &app,
                    json_request(
                        "POST",
                        "/frontend/needs/bulk/bindings",
                        &json!({"pipe": {"id": format!("bulk-{index}")}}),
                    ),
                )
                .await;
                status
            })
        })
        .collect();

    let mut created = 0;
    let mut conflicted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicted += 1,
            status => panic!("unexpected status {status}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(conflicted, 5);
}

#[tokio::test]
async fn offer_bindings_are_unbounded() {
    let app = sample_app();
    for index in 0..5 {
        let (status, _, _) = send_json(
            &app,
            json_request(
                "POST",
                "/frontend/offers/backing_service/bindings",
                &json!({"pipe": {"id": format!("offer-{index}")}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // The https proto default advertised the offer's URI on this end.
    let (_, _, stored) = send_json(&app, bare_request("GET", "/frontend/pipes/offer-0")).await;
    assert_eq!(stored["this"]["data"]["URI"], "https://frontend.example.com");
}
