// cloudpipe-broker/src/handlers.rs
// ============================================================================
// Module: Resource Handlers
// Description: Blueprint reads, binding creation, and the pipe lifecycle.
// Purpose: Translate HTTP requests into pipe data model operations.
// Dependencies: cloudpipe-core, axum, serde_json
// ============================================================================

//! ## Overview
//! Handlers for everything under `/{id}`. Blueprint and template routes are
//! read-only; bindings instantiate a blueprint into a pipe; the pipe routes
//! carry the create/fill/mirror/delete lifecycle. Domain failures map
//! directly onto HTTP statuses with human-readable bodies, and mutations that
//! fail after reserving a blueprint slot release it before responding.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::IntoResponse;
use axum::response::Response;
use cloudpipe_core::Binding;
use cloudpipe_core::Blueprint;
use cloudpipe_core::Link;
use cloudpipe_core::Pipe;
use cloudpipe_core::PipeTemplate;
use cloudpipe_core::Resource;
use cloudpipe_core::combine_schemas;
use cloudpipe_core::find_blueprint;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::server::AppState;

// ============================================================================
// SECTION: Shared Types
// ============================================================================

/// Domain failure mapped onto an HTTP status and a readable body.
type HandlerError = (StatusCode, String);

/// Which blueprint list a route addresses.
#[derive(Debug, Clone, Copy)]
enum BlueprintKind {
    /// Blueprints holding at most one pipe.
    Needs,
    /// Unbounded blueprints.
    Offers,
}

impl BlueprintKind {
    /// Path segment for this list.
    const fn as_str(self) -> &'static str {
        match self {
            Self::Needs => "needs",
            Self::Offers => "offers",
        }
    }

    /// Selects the list on a resource.
    fn select(self, resource: &Resource) -> &[Arc<Blueprint>] {
        match self {
            Self::Needs => &resource.needs,
            Self::Offers => &resource.offers,
        }
    }
}

/// Body returned by a successful binding, the pipe flattened at top level.
#[derive(Debug, Serialize)]
struct BindingResponse<'a> {
    /// Created pipe with its links.
    #[serde(flatten)]
    pipe: &'a Pipe,
    /// Adapter tags the binding resolved.
    adapters: &'a [String],
    /// Proto tag the binding resolved.
    proto: &'a str,
}

// ============================================================================
// SECTION: Lookups
// ============================================================================

/// Finds a registered resource or produces the 404 body.
fn lookup_resource(state: &AppState, id: &str) -> Result<Arc<Resource>, HandlerError> {
    state
        .registry
        .get(id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Resource '{id}' not found")))
}

/// Finds a blueprint by name or produces the 404 body.
fn lookup_blueprint(
    resource: &Resource,
    kind: BlueprintKind,
    sid: &str,
) -> Result<Arc<Blueprint>, HandlerError> {
    find_blueprint(kind.select(resource), sid)
        .map(Arc::clone)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Blueprint '{sid}' not found")))
}

/// Maps a poisoned resource lock onto a 500.
fn lock_poisoned() -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, "resource lock poisoned".to_string())
}

// ============================================================================
// SECTION: Blueprint Reads
// ============================================================================

/// `GET /{id}/needs`
pub async fn list_needs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, HandlerError> {
    list_blueprints(&state, &id, BlueprintKind::Needs)
}

/// `GET /{id}/offers`
pub async fn list_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, HandlerError> {
    list_blueprints(&state, &id, BlueprintKind::Offers)
}

fn list_blueprints(
    state: &AppState,
    id: &str,
    kind: BlueprintKind,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(state, id)?;
    Ok(Json(kind.select(&resource)).into_response())
}

/// `GET /{id}/needs/{sid}`
pub async fn read_need(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    read_blueprint(&state, &id, &sid, BlueprintKind::Needs)
}

/// `GET /{id}/offers/{sid}`
pub async fn read_offer(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    read_blueprint(&state, &id, &sid, BlueprintKind::Offers)
}

fn read_blueprint(
    state: &AppState,
    id: &str,
    sid: &str,
    kind: BlueprintKind,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(state, id)?;
    let blueprint = lookup_blueprint(&resource, kind, sid)?;
    Ok(Json(&*blueprint).into_response())
}

/// `GET /{id}/needs/{sid}/adapters`
pub async fn list_need_adapters(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    list_templates(&state, &id, &sid, BlueprintKind::Needs, TemplateList::Adapters)
}

/// `GET /{id}/offers/{sid}/adapters`
pub async fn list_offer_adapters(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    list_templates(&state, &id, &sid, BlueprintKind::Offers, TemplateList::Adapters)
}

/// `GET /{id}/needs/{sid}/protos`
pub async fn list_need_protos(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    list_templates(&state, &id, &sid, BlueprintKind::Needs, TemplateList::Protos)
}

/// `GET /{id}/offers/{sid}/protos`
pub async fn list_offer_protos(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    list_templates(&state, &id, &sid, BlueprintKind::Offers, TemplateList::Protos)
}

/// Which template list a route addresses.
#[derive(Debug, Clone, Copy)]
enum TemplateList {
    /// Authentication adapter templates.
    Adapters,
    /// Wire proto templates.
    Protos,
}

impl TemplateList {
    fn select(self, blueprint: &Blueprint) -> &[PipeTemplate] {
        match self {
            Self::Adapters => &blueprint.adapters,
            Self::Protos => &blueprint.protos,
        }
    }

    const fn missing_label(self) -> &'static str {
        match self {
            Self::Adapters => "Auth",
            Self::Protos => "Proto",
        }
    }
}

fn list_templates(
    state: &AppState,
    id: &str,
    sid: &str,
    kind: BlueprintKind,
    list: TemplateList,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(state, id)?;
    let blueprint = lookup_blueprint(&resource, kind, sid)?;
    Ok(Json(list.select(&blueprint)).into_response())
}

/// `GET /{id}/needs/{sid}/adapters/{tid}`
pub async fn read_need_adapter(
    State(state): State<Arc<AppState>>,
    Path((id, sid, tid)): Path<(String, String, String)>,
) -> Result<Response, HandlerError> {
    read_template(&state, &id, &sid, &tid, BlueprintKind::Needs, TemplateList::Adapters)
}

/// `GET /{id}/offers/{sid}/adapters/{tid}`
pub async fn read_offer_adapter(
    State(state): State<Arc<AppState>>,
    Path((id, sid, tid)): Path<(String, String, String)>,
) -> Result<Response, HandlerError> {
    read_template(&state, &id, &sid, &tid, BlueprintKind::Offers, TemplateList::Adapters)
}

/// `GET /{id}/needs/{sid}/protos/{tid}`
pub async fn read_need_proto(
    State(state): State<Arc<AppState>>,
    Path((id, sid, tid)): Path<(String, String, String)>,
) -> Result<Response, HandlerError> {
    read_template(&state, &id, &sid, &tid, BlueprintKind::Needs, TemplateList::Protos)
}

/// `GET /{id}/offers/{sid}/protos/{tid}`
pub async fn read_offer_proto(
    State(state): State<Arc<AppState>>,
    Path((id, sid, tid)): Path<(String, String, String)>,
) -> Result<Response, HandlerError> {
    read_template(&state, &id, &sid, &tid, BlueprintKind::Offers, TemplateList::Protos)
}

fn read_template(
    state: &AppState,
    id: &str,
    sid: &str,
    tid: &str,
    kind: BlueprintKind,
    list: TemplateList,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(state, id)?;
    let blueprint = lookup_blueprint(&resource, kind, sid)?;
    let template = list
        .select(&blueprint)
        .iter()
        .find(|template| template.id.as_str() == tid)
        .ok_or_else(|| {
            (StatusCode::NOT_FOUND, format!("{} '{tid}' not found", list.missing_label()))
        })?;
    Ok(Json(template).into_response())
}

// ============================================================================
// SECTION: Bindings
// ============================================================================

/// `POST /{id}/needs/{sid}/bindings`
pub async fn create_need_binding(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
    Json(binding): Json<Binding>,
) -> Result<Response, HandlerError> {
    create_binding(&state, &id, &sid, BlueprintKind::Needs, binding)
}

/// `POST /{id}/offers/{sid}/bindings`
pub async fn create_offer_binding(
    State(state): State<Arc<AppState>>,
    Path((id, sid)): Path<(String, String)>,
    Json(binding): Json<Binding>,
) -> Result<Response, HandlerError> {
    create_binding(&state, &id, &sid, BlueprintKind::Offers, binding)
}

fn create_binding(
    state: &AppState,
    id: &str,
    sid: &str,
    kind: BlueprintKind,
    mut binding: Binding,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(state, id)?;
    let blueprint = lookup_blueprint(&resource, kind, sid)?;

    if binding.wants_default_adapters() {
        binding.adapters = blueprint
            .default_adapters
            .iter()
            .map(|adapter| adapter.as_str().to_string())
            .collect();
    }

    // Every wanted adapter must resolve; report the full missing list.
    let mut templates: Vec<&PipeTemplate> = Vec::new();
    let mut missing: Vec<&str> = Vec::new();
    for wanted in &binding.adapters {
        match blueprint.adapter(wanted) {
            Some(template) => templates.push(template),
            None => missing.push(wanted),
        }
    }
    if !missing.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("Adapters '[{}]' not found", missing.join(" "))));
    }

    let proto_template = match &binding.proto {
        Some(wanted) => blueprint
            .proto(wanted)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Proto '{wanted}' not found")))?,
        None => blueprint.protos.first().ok_or_else(|| {
            (StatusCode::NOT_FOUND, format!("Blueprint '{sid}' declares no protos"))
        })?,
    };
    let proto_tag = proto_template.id.as_str().to_string();
    templates.push(proto_template);

    let blueprint_href = format!("{}/{}/{}/{}", state.config.prefix, id, kind.as_str(), sid);
    let adapter_links: Vec<Link> = binding
        .adapters
        .iter()
        .map(|adapter| Link::to(format!("{blueprint_href}/adapters/{adapter}")))
        .collect();
    binding.pipe.links.blueprint = Some(Link::to(blueprint_href.clone()));
    binding.pipe.links.adapters = adapter_links;
    binding.pipe.links.proto = Some(Link::to(format!("{blueprint_href}/protos/{proto_tag}")));

    create_pipe(state, &resource, &mut binding.pipe, Some(&blueprint), &templates, None)?;

    let location = format!("/{}/pipes/{}", resource.id, binding.pipe.id);
    let body = Json(
        serde_json::to_value(BindingResponse {
            pipe: &binding.pipe,
            adapters: &binding.adapters,
            proto: &proto_tag,
        })
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?,
    );
    Ok((StatusCode::CREATED, [(LOCATION, location)], body).into_response())
}

// ============================================================================
// SECTION: Pipe Collection
// ============================================================================

/// `GET /{id}/pipes`
pub async fn list_pipes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(&state, &id)?;
    let pipes = resource.pipes.read().map_err(|_| lock_poisoned())?;
    Ok(Json(&*pipes).into_response())
}

/// `POST /{id}/pipes`
///
/// Raw creation without a blueprint, used by the owner to preimage a pipe the
/// peer will fill. Basic-only by design: a remote peer cannot bootstrap an
/// inbound pipe.
pub async fn create_raw_pipe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut pipe): Json<Pipe>,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(&state, &id)?;
    create_pipe(&state, &resource, &mut pipe, None, &[], resource.default_data.as_ref())?;
    let location = format!("/{}/pipes/{}", resource.id, pipe.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(pipe)).into_response())
}

// ============================================================================
// SECTION: Pipe Lifecycle
// ============================================================================

/// Creates a pipe on a resource, optionally reserving a blueprint slot.
fn create_pipe(
    state: &AppState,
    resource: &Resource,
    pipe: &mut Pipe,
    blueprint: Option<&Arc<Blueprint>>,
    templates: &[&PipeTemplate],
    default_data: Option<&Value>,
) -> Result<(), HandlerError> {
    let mut pipes = resource.pipes.write().map_err(|_| lock_poisoned())?;
    if pipes.contains_key(&pipe.id) {
        return Err((StatusCode::CONFLICT, format!("Pipe '{}' already exists", pipe.id)));
    }

    // URI and issuer are assigned by the server, never by the client.
    let location = format!("/{}/pipes/{}", resource.id, pipe.id);
    pipe.this.uri = format!("{}{}", state.config.prefix, location);
    pipe.links.self_link = Some(Link::to(pipe.this.uri.clone()));
    pipe.this.issuer = state.config.prefix.clone();

    if let Some(blueprint) = blueprint {
        if !blueprint.add_pipe(&pipe.id) {
            return Err((StatusCode::CONFLICT, "Too many pipes for binding".to_string()));
        }
        pipe.this.schema =
            combine_schemas(templates.iter().map(|template| template.this_schema.clone()).collect());
        pipe.other.schema =
            combine_schemas(templates.iter().map(|template| template.other_schema.clone()).collect());
        pipe.blueprint = Some(Arc::clone(blueprint));
    }

    for template in templates {
        if let Some(data) = &template.data {
            if let Err(err) = pipe.this.set_data(data) {
                release_slot(blueprint, &pipe.id);
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Could not set data: {err}"),
                ));
            }
        }
    }
    if let Some(data) = default_data {
        if let Err(err) = pipe.this.set_data(data) {
            release_slot(blueprint, &pipe.id);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, format!("Could not set data: {err}")));
        }
    }

    pipes.insert(pipe.id.clone(), pipe.clone());
    drop(pipes);

    maybe_update_other(state, pipe);
    notify_owner(resource, pipe);
    Ok(())
}

/// Releases a reserved blueprint slot during rollback.
fn release_slot(blueprint: Option<&Arc<Blueprint>>, id: &str) {
    if let Some(blueprint) = blueprint {
        blueprint.delete_pipe(id);
    }
}

/// `GET /{id}/pipes/{pid}`
pub async fn read_pipe(
    State(state): State<Arc<AppState>>,
    Path((id, pid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(&state, &id)?;
    let pipes = resource.pipes.read().map_err(|_| lock_poisoned())?;
    let pipe = pipes
        .get(&pid)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Pipe '{pid}' not found")))?;
    Ok(Json(pipe).into_response())
}

/// `PATCH /{id}/pipes/{pid}`
///
/// Copy, merge, validate, replace: the stored pipe is untouched unless the
/// merged copy validates against both composed schemas.
pub async fn update_pipe(
    State(state): State<Arc<AppState>>,
    Path((id, pid)): Path<(String, String)>,
    Json(input): Json<Pipe>,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(&state, &id)?;

    let (updated, this_changed, other_changed) = {
        let mut pipes = resource.pipes.write().map_err(|_| lock_poisoned())?;
        let existing = pipes
            .get(&pid)
            .cloned()
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Pipe '{pid}' not found")))?;
        let mut merged = existing.clone();
        merged.merge(&input).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
        merged.validate().map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
        let this_changed = !merged.this.equals(&existing.this);
        let other_changed = !merged.other.equals(&existing.other);
        pipes.insert(pid.clone(), merged.clone());
        (merged, this_changed, other_changed)
    };

    if this_changed {
        maybe_update_other(&state, &updated);
    }
    if this_changed || other_changed {
        notify_owner(&resource, &updated);
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

/// `DELETE /{id}/pipes/{pid}`
///
/// Releases the blueprint slot and removes the pipe. The peer end is not
/// notified; it discovers the deletion on its next mirror attempt.
pub async fn delete_pipe(
    State(state): State<Arc<AppState>>,
    Path((id, pid)): Path<(String, String)>,
) -> Result<Response, HandlerError> {
    let resource = lookup_resource(&state, &id)?;
    let mut pipes = resource.pipes.write().map_err(|_| lock_poisoned())?;
    let pipe = pipes
        .remove(&pid)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Pipe '{pid}' not found")))?;
    if let Some(blueprint) = &pipe.blueprint {
        blueprint.delete_pipe(&pipe.id);
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ============================================================================
// SECTION: Side Effects
// ============================================================================

/// Mirrors the local end to the peer when the pipe knows its peer URI.
fn maybe_update_other(state: &AppState, pipe: &Pipe) {
    let Some(data) = &pipe.this.data else {
        return;
    };
    if pipe.other.uri.is_empty() {
        return;
    }
    match state.issuer.generate_token(&state.config.prefix, &pipe.other.uri, &pipe.this.uri) {
        Ok(token) => state.mirror.update_other(token, pipe.other.uri.clone(), data.clone()),
        Err(err) => error!("Error generating token: {err}"),
    }
}

/// Invokes the resource's update callback; failures are logged, never fatal.
fn notify_owner(resource: &Resource, pipe: &Pipe) {
    if let Some(callback) = &resource.update_callback {
        if let Err(err) = callback(pipe) {
            error!(resource = %resource.id, pipe = %pipe.id, "Error calling update callback: {err}");
        }
    }
}
