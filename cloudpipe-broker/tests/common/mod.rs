// cloudpipe-broker/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared registry, router, and request helpers for broker tests.
// Purpose: Provide reusable infrastructure for deterministic HTTP testing.
// Dependencies: cloudpipe-core, cloudpipe-broker, axum, tower
// ============================================================================

#![allow(dead_code, reason = "Shared test helpers may be unused in some suites.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloudpipe_broker::AppState;
use cloudpipe_broker::ServerConfig;
use cloudpipe_broker::router;
use cloudpipe_core::AdapterType;
use cloudpipe_core::Blueprint;
use cloudpipe_core::OidcAuthData;
use cloudpipe_core::PipeTemplate;
use cloudpipe_core::ProtoType;
use cloudpipe_core::Resource;
use cloudpipe_core::ResourceRegistry;
use cloudpipe_core::TemplateId;
use cloudpipe_core::UriData;
use serde_json::Value;
use tower::ServiceExt;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Public prefix used by oneshot suites.
pub const PREFIX: &str = "http://localhost:8000";

/// Builds the consumer-style registry used across the suites.
///
/// `frontend` declares a `db` need (one slot), a `bulk` need variant with
/// three slots, and a `backing_service` offer.
#[must_use]
pub fn sample_registry() -> Arc<ResourceRegistry> {
    let mut frontend = Resource::new("frontend");
    frontend.needs = vec![
        Arc::new(Blueprint::need(
            "db",
            vec![AdapterType::Oidc],
            vec![
                PipeTemplate::new(
                    false,
                    TemplateId::Adapter(AdapterType::Oidc),
                    Some(
                        serde_json::to_value(OidcAuthData {
                            issuer: "https://oidc.example.com".to_string(),
                            subject: "frontend".to_string(),
                            audience: "db".to_string(),
                        })
                        .expect("oidc payload"),
                    ),
                ),
                PipeTemplate::new(false, TemplateId::Adapter(AdapterType::Server), None),
            ],
            vec![PipeTemplate::new(false, TemplateId::Proto(ProtoType::Postgresqls), None)],
        )),
        Arc::new(Blueprint::new(
            "bulk",
            vec![AdapterType::Oidc],
            vec![PipeTemplate::new(false, TemplateId::Adapter(AdapterType::Oidc), None)],
            vec![PipeTemplate::new(false, TemplateId::Proto(ProtoType::Https), None)],
            3,
        )),
    ];
    frontend.offers = vec![Arc::new(Blueprint::offer(
        "backing_service",
        vec![AdapterType::Oidc],
        vec![PipeTemplate::new(true, TemplateId::Adapter(AdapterType::Oidc), None)],
        vec![PipeTemplate::new(
            true,
            TemplateId::Proto(ProtoType::Https),
            Some(
                serde_json::to_value(UriData {
                    uri: "https://frontend.example.com".to_string(),
                })
                .expect("uri payload"),
            ),
        )],
    ))];
    Arc::new(ResourceRegistry::new(vec![frontend]))
}

/// Builds app state over the sample registry with the given prefix.
#[must_use]
pub fn sample_state(prefix: &str) -> Arc<AppState> {
    let config = ServerConfig {
        port: 0,
        prefix: prefix.to_string(),
    };
    Arc::new(AppState::new(sample_registry(), config).expect("app state"))
}

/// Builds the full router over the sample registry.
#[must_use]
pub fn sample_app() -> Router {
    router(sample_state(PREFIX))
}

// ============================================================================
// SECTION: Request Helpers
// ============================================================================

/// Owner Basic authorization header value.
#[must_use]
pub fn basic_auth() -> String {
    format!("Basic {}", STANDARD.encode("foo:bar"))
}

/// Builds an authenticated JSON request.
#[must_use]
pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, basic_auth())
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Builds an authenticated bodyless request.
#[must_use]
pub fn bare_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, basic_auth())
        .body(Body::empty())
        .expect("request")
}

/// Sends a request through the router and collects the response.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, headers, String::from_utf8_lossy(&bytes).to_string())
}

/// Sends a request and parses the response body as JSON.
pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };
    (status, headers, value)
}
