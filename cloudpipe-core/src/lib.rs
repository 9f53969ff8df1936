// cloudpipe-core/src/lib.rs
// ============================================================================
// Module: Cloudpipe Core
// Description: Pipe data model, blueprint templates, and schema engine.
// Purpose: Provide the domain types shared by the broker and the CLI.
// Dependencies: serde, serde_json, jsonschema
// ============================================================================

//! ## Overview
//! Cloudpipe Core holds the broker-independent domain model: payload shape
//! reflection into JSON Schemas, adapter/proto templates, blueprints with
//! slot accounting, pipes with their two ends, and the in-memory resource
//! registry. The HTTP surface lives in `cloudpipe-broker`; this crate has no
//! network dependencies.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod blueprint;
pub mod pipe;
pub mod resource;
pub mod schema;
pub mod template;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use blueprint::Binding;
pub use blueprint::Blueprint;
pub use blueprint::find_blueprint;
pub use pipe::End;
pub use pipe::Link;
pub use pipe::Links;
pub use pipe::Pipe;
pub use pipe::PipeError;
pub use resource::CallbackError;
pub use resource::PipeCallback;
pub use resource::Resource;
pub use resource::ResourceRegistry;
pub use schema::SCHEMA_VERSION;
pub use schema::SchemaError;
pub use schema::combine_schemas;
pub use schema::generate_schema;
pub use schema::validate;
pub use template::AdapterType;
pub use template::BasicAuthData;
pub use template::MtlsAuthData;
pub use template::OidcAuthData;
pub use template::PayloadField;
pub use template::PayloadShape;
pub use template::PipeTemplate;
pub use template::ProtoType;
pub use template::SecretAuthData;
pub use template::TemplateId;
pub use template::UriData;
