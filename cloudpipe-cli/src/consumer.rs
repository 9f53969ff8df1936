// cloudpipe-cli/src/consumer.rs
// ============================================================================
// Module: Consumer Adapter
// Description: Demo consumer broker topology.
// Purpose: Run a frontend resource needing a database and a backend.
// Dependencies: cloudpipe-core, cloudpipe-broker
// ============================================================================

//! ## Overview
//! The consumer demo serves one `frontend` resource with two needs: a
//! `db` need combining oidc and server auth over postgresqls, and a
//! `backend` need using oidc over https.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use cloudpipe_broker::run_broker_server;
use cloudpipe_core::AdapterType;
use cloudpipe_core::Blueprint;
use cloudpipe_core::OidcAuthData;
use cloudpipe_core::PipeTemplate;
use cloudpipe_core::ProtoType;
use cloudpipe_core::Resource;
use cloudpipe_core::ResourceRegistry;
use cloudpipe_core::TemplateId;

use crate::CliError;

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// Runs the consumer broker on port 8000.
pub async fn run() -> Result<(), CliError> {
    Ok(run_broker_server(8000, build_registry()).await?)
}

/// Builds the consumer demo registry.
fn build_registry() -> Arc<ResourceRegistry> {
    let mut frontend = Resource::new("frontend");
    frontend.needs = vec![
        Arc::new(Blueprint::need(
            "db",
            Vec::new(),
            vec![
                PipeTemplate::new(
                    false,
                    TemplateId::Adapter(AdapterType::Oidc),
                    oidc_payload("https://oidc.heroku.com", "frontend", "db"),
                ),
                PipeTemplate::new(false, TemplateId::Adapter(AdapterType::Server), None),
            ],
            vec![PipeTemplate::new(false, TemplateId::Proto(ProtoType::Postgresqls), None)],
        )),
        Arc::new(Blueprint::need(
            "backend",
            vec![AdapterType::Oidc],
            vec![PipeTemplate::new(
                false,
                TemplateId::Adapter(AdapterType::Oidc),
                oidc_payload("https://oidc.heroku.com", "frontend", "backend"),
            )],
            vec![PipeTemplate::new(false, TemplateId::Proto(ProtoType::Https), None)],
        )),
    ];
    Arc::new(ResourceRegistry::new(vec![frontend]))
}

/// OIDC default payload for a consumer-side need.
fn oidc_payload(issuer: &str, subject: &str, audience: &str) -> Option<serde_json::Value> {
    serde_json::to_value(OidcAuthData {
        issuer: issuer.to_string(),
        subject: subject.to_string(),
        audience: audience.to_string(),
    })
    .ok()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
