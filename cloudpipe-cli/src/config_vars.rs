// cloudpipe-cli/src/config_vars.rs
// ============================================================================
// Module: Config Publication
// Description: Flatten pipe data into configuration variables.
// Purpose: Publish negotiated pipe state into the owning application.
// Dependencies: cloudpipe-core, serde_json
// ============================================================================

//! ## Overview
//! Deployment adapters publish pipe state as configuration variables. Each
//! end's data flattens under `PIPE_{id}_THIS_*` / `PIPE_{id}_OTHER_*`, the
//! original-case pipe id is preserved under `PIPE_{id}_ID`, incoming OIDC
//! claims become an `INCOMING_IDENTITY` validator map, and a consumer pipe
//! carrying a URI and a local audience gets `{ID}_AUDIENCE` for identity
//! token creation. A `None` value means "unset this variable".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use cloudpipe_core::AdapterType;
use cloudpipe_core::Blueprint;
use cloudpipe_core::CallbackError;
use cloudpipe_core::OidcAuthData;
use cloudpipe_core::Pipe;
use cloudpipe_core::PipeCallback;
use cloudpipe_core::PipeTemplate;
use cloudpipe_core::ProtoType;
use cloudpipe_core::Resource;
use cloudpipe_core::TemplateId;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::info;

// ============================================================================
// SECTION: Updater Interface
// ============================================================================

/// Configuration variables keyed by name; `None` means unset.
pub type ConfigVars = BTreeMap<String, Option<String>>;

/// Adapter-provided sink for configuration variables.
pub type ConfigUpdater = Arc<dyn Fn(&str, &ConfigVars) -> Result<(), CallbackError> + Send + Sync>;

// ============================================================================
// SECTION: Identity Validators
// ============================================================================

/// Claim patterns an application should enforce on an incoming pipe.
#[derive(Debug, Serialize)]
pub struct IdentityValidator {
    /// Expected token issuer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub iss: String,
    /// Expected token subject.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sub: String,
    /// Expected token audience.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub aud: String,
}

// ============================================================================
// SECTION: Publication
// ============================================================================

/// Flattens a pipe into configuration variables and hands them to the sink.
///
/// # Errors
///
/// Returns [`CallbackError`] when the pipe data is malformed or the sink
/// fails.
pub fn update_config(
    name: &str,
    pipe: &Pipe,
    updater: &ConfigUpdater,
) -> Result<(), CallbackError> {
    let mut vars = ConfigVars::new();
    flatten_data(pipe.this.data.as_ref(), &format!("PIPE_{}_THIS_", pipe.id), &mut vars);
    flatten_data(pipe.other.data.as_ref(), &format!("PIPE_{}_OTHER_", pipe.id), &mut vars);
    incoming_identity(pipe, &mut vars)?;
    // The original-case id lets the local adapter rebuild pipes later.
    vars.insert(format!("PIPE_{}_ID", pipe.id), Some(pipe.id.clone()));
    info!("Updating config for {name} with {vars:?}");
    updater(name, &vars)
}

/// Flattens one end's data object under an uppercased key prefix.
fn flatten_data(data: Option<&Value>, prefix: &str, vars: &mut ConfigVars) {
    let Some(Value::Object(fields)) = data else {
        return;
    };
    for (key, value) in fields {
        vars.insert(format!("{prefix}{key}").to_uppercase(), Some(stringify(value)));
    }
}

/// Renders a scalar config value the way applications expect it.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Publishes identity material derived from the peer end.
fn incoming_identity(pipe: &Pipe, vars: &mut ConfigVars) -> Result<(), CallbackError> {
    let Some(Value::Object(other)) = &pipe.other.data else {
        return Ok(());
    };
    if other.contains_key("ISS") {
        let validator = IdentityValidator {
            iss: string_field(other, "ISS")?,
            sub: string_field(other, "SUB")?,
            aud: string_field(other, "AUD")?,
        };
        let mut incoming: BTreeMap<String, IdentityValidator> = BTreeMap::new();
        incoming.insert(pipe.id.clone(), validator);
        let encoded = serde_json::to_string(&incoming)
            .map_err(|err| CallbackError(format!("error marshaling identity: {err}")))?;
        vars.insert("INCOMING_IDENTITY".to_string(), Some(encoded));
    }
    if other.contains_key("URI") {
        if let Some(Value::Object(this)) = &pipe.this.data {
            if let Some(audience) = this.get("AUD").and_then(Value::as_str) {
                vars.insert(
                    format!("{}_AUDIENCE", pipe.id).to_uppercase(),
                    Some(audience.to_string()),
                );
            }
        }
    }
    Ok(())
}

/// Reads a required string field from an end data object.
fn string_field(fields: &Map<String, Value>, name: &str) -> Result<String, CallbackError> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CallbackError(format!("field '{name}' is missing or not a string")))
}

// ============================================================================
// SECTION: Standard App Resource
// ============================================================================

/// Builds the standard `backing_service` resource for a platform application.
///
/// The app offers itself as an https+oidc backing service and declares a
/// matching need; the updater receives every configuration change.
#[must_use]
pub fn resource_for_app(
    name: &str,
    url: &str,
    iss: &str,
    sub: &str,
    updater: ConfigUpdater,
) -> Resource {
    info!("Adding resource {name} at {url}");
    let callback_name = name.to_string();
    let callback: PipeCallback =
        Arc::new(move |pipe| update_config(&callback_name, pipe, &updater));

    let mut resource = Resource::new(name);
    resource.default_data = Some(json!({"URI": url}));
    resource.update_callback = Some(callback);
    resource.offers = vec![Arc::new(Blueprint::offer(
        "backing_service",
        vec![AdapterType::Oidc],
        vec![PipeTemplate::new(true, TemplateId::Adapter(AdapterType::Oidc), None)],
        vec![PipeTemplate::new(
            true,
            TemplateId::Proto(ProtoType::Https),
            Some(json!({"URI": url})),
        )],
    ))];
    resource.needs = vec![Arc::new(Blueprint::need(
        "backing_service",
        vec![AdapterType::Oidc],
        vec![PipeTemplate::new(
            false,
            TemplateId::Adapter(AdapterType::Oidc),
            serde_json::to_value(OidcAuthData {
                issuer: iss.to_string(),
                subject: sub.to_string(),
                // The audience matches the need.
                audience: "backing_service".to_string(),
            })
            .ok(),
        )],
        vec![PipeTemplate::new(false, TemplateId::Proto(ProtoType::Https), None)],
    ))];
    resource
}

// ============================================================================
// SECTION: Tests
// ============================================================================
