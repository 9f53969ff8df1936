// cloudpipe-broker/src/server.rs
// ============================================================================
// Module: Broker Server
// Description: Route table, shared state, and listener setup.
// Purpose: Serve the pipe control plane and the embedded OIDC endpoints.
// Dependencies: cloudpipe-core, axum, tokio
// ============================================================================

//! ## Overview
//! The server wires three route groups: owner routes behind Basic auth,
//! the per-pipe routes behind pipe-scoped bearer-or-Basic auth, and the open
//! discovery/debug endpoints. The public prefix defaults to
//! `http://localhost:{port}` and is overridden with `ROOT_URL`; `PORT`
//! overrides the listen port.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::routing::get;
use axum::routing::post;
use cloudpipe_core::ResourceRegistry;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth;
use crate::handlers;
use crate::issuer::IssuerError;
use crate::issuer::OidcIssuer;
use crate::mirror::MirrorClient;
use crate::verifier::OidcVerifier;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Embedded issuer could not be initialized.
    #[error(transparent)]
    Issuer(#[from] IssuerError),
    /// Verifier or mirror HTTP client could not be built.
    #[error("client build failed: {0}")]
    Client(String),
    /// Listener could not be bound.
    #[error("bind failed: {0}")]
    Bind(String),
    /// Server terminated with an error.
    #[error("server failed: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Server configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Public prefix used as the issuer and in assigned pipe URIs.
    pub prefix: String,
}

/// Resolves port and public prefix, honoring `PORT` and `ROOT_URL`.
#[must_use]
pub fn resolve_port_and_prefix(default_port: u16) -> ServerConfig {
    let port = env::var("PORT").ok().and_then(|value| value.parse().ok()).unwrap_or(default_port);
    let prefix =
        env::var("ROOT_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));
    ServerConfig {
        port,
        prefix,
    }
}

// ============================================================================
// SECTION: Application State
// ============================================================================

/// Shared state handed to every handler.
pub struct AppState {
    /// Resource registry, read-only after startup.
    pub registry: Arc<ResourceRegistry>,
    /// Resolved server configuration.
    pub config: ServerConfig,
    /// Embedded OIDC issuer signing outbound mirror calls.
    pub issuer: Arc<OidcIssuer>,
    /// Bearer token verifier with its provider cache.
    pub verifier: Arc<OidcVerifier>,
    /// Mirror client delivering peer updates.
    pub mirror: MirrorClient,
}

impl AppState {
    /// Builds the state, generating the process keypair.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the issuer, verifier, or mirror client
    /// cannot be initialized.
    pub fn new(registry: Arc<ResourceRegistry>, config: ServerConfig) -> Result<Self, ServerError> {
        Ok(Self {
            registry,
            config,
            issuer: Arc::new(OidcIssuer::generate()?),
            verifier: Arc::new(
                OidcVerifier::new().map_err(|err| ServerError::Client(err.to_string()))?,
            ),
            mirror: MirrorClient::new().map_err(|err| ServerError::Client(err.to_string()))?,
        })
    }

    /// Replaces the mirror client, used to shorten retry delays in tests.
    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorClient) -> Self {
        self.mirror = mirror;
        self
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full broker router over the shared state.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let owner_routes = Router::new()
        .route("/{id}/needs", get(handlers::list_needs))
        .route("/{id}/offers", get(handlers::list_offers))
        .route("/{id}/needs/{sid}", get(handlers::read_need))
        .route("/{id}/offers/{sid}", get(handlers::read_offer))
        .route("/{id}/needs/{sid}/adapters", get(handlers::list_need_adapters))
        .route("/{id}/offers/{sid}/adapters", get(handlers::list_offer_adapters))
        .route("/{id}/needs/{sid}/protos", get(handlers::list_need_protos))
        .route("/{id}/offers/{sid}/protos", get(handlers::list_offer_protos))
        .route("/{id}/needs/{sid}/adapters/{tid}", get(handlers::read_need_adapter))
        .route("/{id}/offers/{sid}/adapters/{tid}", get(handlers::read_offer_adapter))
        .route("/{id}/needs/{sid}/protos/{tid}", get(handlers::read_need_proto))
        .route("/{id}/offers/{sid}/protos/{tid}", get(handlers::read_offer_proto))
        .route("/{id}/needs/{sid}/bindings", post(handlers::create_need_binding))
        .route("/{id}/offers/{sid}/bindings", post(handlers::create_offer_binding))
        .route("/{id}/pipes", get(handlers::list_pipes).post(handlers::create_raw_pipe))
        .route_layer(middleware::from_fn(auth::require_basic));

    let pipe_routes = Router::new()
        .route(
            "/{id}/pipes/{pid}",
            get(handlers::read_pipe)
                .patch(handlers::update_pipe)
                .delete(handlers::delete_pipe),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_pipe_auth,
        ));

    let open_routes = Router::new()
        .route("/debug", any(debug_echo))
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/.well-known/authorize", any(not_implemented))
        .route("/.well-known/token", any(not_implemented));

    Router::new().merge(owner_routes).merge(pipe_routes).merge(open_routes).with_state(state)
}

/// Runs the broker server until it fails.
///
/// # Errors
///
/// Returns [`ServerError`] when initialization, binding, or serving fails.
pub async fn run_broker_server(
    default_port: u16,
    registry: Arc<ResourceRegistry>,
) -> Result<(), ServerError> {
    let config = resolve_port_and_prefix(default_port);
    let port = config.port;
    let state = Arc::new(AppState::new(registry, config)?);
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        TcpListener::bind(addr).await.map_err(|err| ServerError::Bind(err.to_string()))?;
    info!("Listening on :{port}...");
    axum::serve(listener, app).await.map_err(|err| ServerError::Serve(err.to_string()))
}

// ============================================================================
// SECTION: Open Endpoints
// ============================================================================

/// `GET /.well-known/openid-configuration`
async fn openid_configuration(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.issuer.discovery_document(&state.config.prefix))
}

/// `GET /.well-known/jwks.json`
async fn jwks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.issuer.jwks_document())
}

/// Reserved OAuth endpoints; the broker does not participate in OAuth flows.
async fn not_implemented() -> impl IntoResponse {
    (StatusCode::NOT_IMPLEMENTED, "Endpoint is not implemented")
}

/// `/debug`: echoes the request back as plain text for troubleshooting.
async fn debug_echo(request: Request) -> String {
    let mut details = String::new();
    let _ = writeln!(details, "Method: {}", request.method());
    let _ = writeln!(details, "URL: {}", request.uri());
    let _ = writeln!(details, "Proto: {:?}", request.version());
    for (name, value) in request.headers() {
        let _ = writeln!(details, "Header: {name}: {}", String::from_utf8_lossy(value.as_bytes()));
    }
    info!("Received request:\n{details}");
    details
}
