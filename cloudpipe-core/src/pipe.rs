// cloudpipe-core/src/pipe.rs
// ============================================================================
// Module: Pipe Data Model
// Description: Pipe ends, shallow data merging, and HAL links.
// Purpose: Model the negotiated connection between two brokers.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A pipe joins two ends. `this` is owned by the local broker (its URI and
//! issuer are assigned on creation and never mutated by clients); `other` is
//! an advisory mirror of peer state. End data is a flat object of scalar
//! fields merged key-by-key, last writer wins, and must validate against the
//! end's composed schema after every change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::blueprint::Blueprint;
use crate::schema;
use crate::schema::SchemaError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by pipe and end mutations.
#[derive(Debug, Error)]
pub enum PipeError {
    /// End data must be a flat JSON object.
    #[error("end data must be a json object")]
    DataNotObject,
    /// Schema engine failure during merge or validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

// ============================================================================
// SECTION: End
// ============================================================================

/// One side of a pipe: identity, location, schema, and advertised data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct End {
    /// Token issuer for this side, assigned by its broker.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    /// Pipe URI on this side's broker, assigned by its broker.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Composed schema governing this side's data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Advertised connection metadata, a flat object of scalar fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl End {
    /// Returns true when no field of the end is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuer.is_empty() && self.uri.is_empty() && self.schema.is_none() && self.data.is_none()
    }

    /// Overlays a payload onto the existing data, key by key.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::DataNotObject`] when either side is not an object.
    pub fn set_data(&mut self, payload: &Value) -> Result<(), PipeError> {
        let incoming = payload.as_object().ok_or(PipeError::DataNotObject)?;
        let mut merged = match &self.data {
            Some(Value::Object(existing)) => existing.clone(),
            Some(_) => return Err(PipeError::DataNotObject),
            None => Map::new(),
        };
        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
        self.data = Some(Value::Object(merged));
        Ok(())
    }

    /// Merges another end into this one: schemas combine, data overlays.
    ///
    /// Issuer and URI are broker-assigned and are never taken from the
    /// incoming end.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError`] when the incoming data is not an object.
    pub fn merge(&mut self, other: &End) -> Result<(), PipeError> {
        self.schema = schema::combine_schemas(vec![self.schema.take(), other.schema.clone()]);
        if let Some(data) = &other.data {
            self.set_data(data)?;
        }
        Ok(())
    }

    /// Validates the data against the composed schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Validation`] listing every violation.
    pub fn validate(&self) -> Result<(), SchemaError> {
        schema::validate(self.schema.as_ref(), self.data.as_ref())
    }

    /// Field-by-field equality; schemas compare by `$id` when both carry one.
    #[must_use]
    pub fn equals(&self, other: &End) -> bool {
        self.issuer == other.issuer
            && self.uri == other.uri
            && schemas_equal(self.schema.as_ref(), other.schema.as_ref())
            && self.data == other.data
    }
}

/// Compares two optional schemas, preferring `$id` identity.
fn schemas_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => {
            let ids = (left.get("$id").and_then(Value::as_str), right.get("$id").and_then(Value::as_str));
            if let (Some(left_id), Some(right_id)) = ids {
                left_id == right_id
            } else {
                left == right
            }
        }
        _ => false,
    }
}

// ============================================================================
// SECTION: Links
// ============================================================================

/// A single HAL link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Link {
    /// Target URI.
    pub href: String,
}

impl Link {
    /// Builds a link to the given target.
    #[must_use]
    pub fn to(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
        }
    }
}

/// HAL `_links` attached to a pipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    /// Canonical URI of the pipe itself.
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<Link>,
    /// Blueprint the pipe was instantiated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<Link>,
    /// Adapter templates used by the binding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adapters: Vec<Link>,
    /// Proto template used by the binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<Link>,
}

// ============================================================================
// SECTION: Pipe
// ============================================================================

/// An instantiated connection between a local and a remote end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipe {
    /// Pipe identifier, unique within its resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Local end, owned by this broker.
    #[serde(default, skip_serializing_if = "End::is_empty")]
    pub this: End,
    /// Remote end, an advisory mirror of peer state.
    #[serde(default, skip_serializing_if = "End::is_empty")]
    pub other: End,
    /// HAL links for the pipe.
    #[serde(rename = "_links", default)]
    pub links: Links,
    /// Blueprint slot held by this pipe, if it was bound from one.
    #[serde(skip)]
    pub blueprint: Option<Arc<Blueprint>>,
}

impl Pipe {
    /// Merges an incoming partial pipe into this one, end by end.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError`] when either end's data is not an object.
    pub fn merge(&mut self, incoming: &Pipe) -> Result<(), PipeError> {
        self.this.merge(&incoming.this)?;
        self.other.merge(&incoming.other)?;
        Ok(())
    }

    /// Validates both ends against their composed schemas.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Validation`] listing every violation.
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.this.validate()?;
        self.other.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only pipe assertions.")]

    use serde_json::json;

    use super::End;
    use super::Pipe;
    use crate::template::PipeTemplate;
    use crate::template::ProtoType;
    use crate::template::TemplateId;

    #[test]
    fn set_data_overlays_keys_last_writer_wins() {
        let mut end = End::default();
        end.set_data(&json!({"X": "1", "Y": "old"})).unwrap();
        end.set_data(&json!({"Y": "2"})).unwrap();
        assert_eq!(end.data, Some(json!({"X": "1", "Y": "2"})));
    }

    #[test]
    fn set_data_rejects_non_object_payload() {
        let mut end = End::default();
        assert!(end.set_data(&json!("scalar")).is_err());
    }

    #[test]
    fn merge_keeps_broker_assigned_identity() {
        let mut stored = End {
            issuer: "http://localhost:8000".to_string(),
            uri: "http://localhost:8000/a/pipes/p".to_string(),
            ..End::default()
        };
        let incoming = End {
            issuer: "http://evil".to_string(),
            uri: "http://evil/pipes/p".to_string(),
            data: Some(json!({"URI": "https://svc"})),
            ..End::default()
        };
        stored.merge(&incoming).unwrap();
        assert_eq!(stored.issuer, "http://localhost:8000");
        assert_eq!(stored.uri, "http://localhost:8000/a/pipes/p");
        assert_eq!(stored.data, Some(json!({"URI": "https://svc"})));
    }

    #[test]
    fn equals_compares_schemas_by_id() {
        let template = PipeTemplate::new(true, TemplateId::Proto(ProtoType::Https), None);
        let left = End {
            schema: template.this_schema.clone(),
            ..End::default()
        };
        let mut right = left.clone();
        assert!(left.equals(&right));
        if let Some(schema) = right.schema.as_mut() {
            schema["properties"]["URI"]["pattern"] = json!("^http://");
        }
        // Same $id wins even though the documents differ.
        assert!(left.equals(&right));
    }

    #[test]
    fn validate_rejects_data_outside_schema() {
        let template = PipeTemplate::new(true, TemplateId::Proto(ProtoType::Https), None);
        let mut pipe = Pipe {
            id: "p1".to_string(),
            ..Pipe::default()
        };
        pipe.this.schema = template.this_schema.clone();
        pipe.this.set_data(&json!({"URI": "ftp://x"})).unwrap();
        assert!(pipe.validate().is_err());
        pipe.this.set_data(&json!({"URI": "https://x"})).unwrap();
        assert!(pipe.validate().is_ok());
    }

    #[test]
    fn empty_pipe_serializes_without_ends() {
        let value = serde_json::to_value(Pipe::default()).unwrap();
        assert_eq!(value, json!({"_links": {}}));
    }
}
