// cloudpipe-broker/src/lib.rs
// ============================================================================
// Module: Cloudpipe Broker
// Description: HTTP control plane, auth layers, OIDC issuer, and peer mirror.
// Purpose: Serve the pipe lifecycle over authenticated HTTP.
// Dependencies: cloudpipe-core, axum, tokio, reqwest, jsonwebtoken
// ============================================================================

//! ## Overview
//! The broker exposes each registered resource's needs, offers, and pipes over
//! HTTP. Owners authenticate with Basic credentials; peer brokers authenticate
//! with OIDC bearer tokens scoped to one specific pipe. Local changes to a
//! pipe's `this` end are mirrored to the peer broker with a signed `PATCH`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod handlers;
pub mod issuer;
pub mod mirror;
pub mod server;
pub mod verifier;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use issuer::IssuerError;
pub use issuer::KEY_ID;
pub use issuer::OidcIssuer;
pub use mirror::MirrorClient;
pub use server::AppState;
pub use server::ServerConfig;
pub use server::ServerError;
pub use server::resolve_port_and_prefix;
pub use server::router;
pub use server::run_broker_server;
pub use verifier::ClaimRules;
pub use verifier::OidcVerifier;
pub use verifier::VerifyError;
