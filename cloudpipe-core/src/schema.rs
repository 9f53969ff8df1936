// cloudpipe-core/src/schema.rs
// ============================================================================
// Module: Schema Engine
// Description: JSON Schema generation, combination, and validation.
// Purpose: Turn payload shape descriptors into the schemas governing pipe ends.
// Dependencies: jsonschema, serde_json
// ============================================================================

//! ## Overview
//! Every adapter and proto template contributes a payload shape to each end of
//! a pipe. The schema engine reflects those shapes into JSON Schema documents,
//! combines several documents into one `allOf` composition, and validates end
//! data against the composed schema under Draft 2020-12.

// ============================================================================
// SECTION: Imports
// ============================================================================

use jsonschema::Draft;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::template::PayloadShape;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema dialect header applied to every generated document.
pub const SCHEMA_VERSION: &str = "https://json-schema.org/draft/2020-12/schema";

/// Base URI for generated schema identifiers.
const SCHEMA_ID_PREFIX: &str = "https://cloudpipe.dev/schemas/";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the schema engine.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Schema document failed to compile.
    #[error("invalid schema: {0}")]
    Compile(String),
    /// Data failed validation against its schema.
    #[error("Data does not match schema. see errors :\n{0}")]
    Validation(String),
}

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Reflects a list of payload shapes into a single schema document.
///
/// Absent shapes are skipped. Returns `None` when nothing remains, the single
/// reflected document when one shape is present, and an `allOf` composition
/// otherwise.
#[must_use]
pub fn generate_schema(shapes: &[Option<PayloadShape>]) -> Option<Value> {
    let reflected = shapes.iter().map(|shape| shape.as_ref().map(reflect_shape)).collect();
    combine_schemas(reflected)
}

/// Reflects one payload shape descriptor into a schema document.
///
/// All declared fields are required strings; `additionalProperties` is left
/// unset so peers may advertise extra fields.
#[must_use]
pub fn reflect_shape(shape: &PayloadShape) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in shape.fields {
        let mut property = Map::new();
        property.insert("type".to_string(), json!("string"));
        if let Some(pattern) = field.pattern {
            property.insert("pattern".to_string(), json!(pattern));
        }
        properties.insert(field.name.to_string(), Value::Object(property));
        required.push(json!(field.name));
    }
    json!({
        "$schema": SCHEMA_VERSION,
        "$id": format!("{SCHEMA_ID_PREFIX}{}", shape.id),
        "type": "object",
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

/// Combines pre-built schema documents into one.
///
/// `None` entries are dropped. Idempotent for single-element input: the lone
/// schema is returned unchanged. For several schemas the dialect header moves
/// to the `allOf` wrapper and is stripped from each member.
#[must_use]
pub fn combine_schemas(schemas: Vec<Option<Value>>) -> Option<Value> {
    let mut filtered: Vec<Value> = schemas.into_iter().flatten().collect();
    match filtered.len() {
        0 => None,
        1 => filtered.pop(),
        _ => {
            for schema in &mut filtered {
                if let Value::Object(map) = schema {
                    map.remove("$schema");
                }
            }
            Some(json!({
                "$schema": SCHEMA_VERSION,
                "allOf": Value::Array(filtered),
            }))
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates end data against a composed schema.
///
/// Either side being absent is a success: a schemaless end accepts anything
/// and an empty end trivially conforms.
///
/// # Errors
///
/// Returns [`SchemaError::Compile`] for an uncompilable schema and
/// [`SchemaError::Validation`] with every violation listed when the data does
/// not conform.
pub fn validate(schema: Option<&Value>, data: Option<&Value>) -> Result<(), SchemaError> {
    let (Some(schema), Some(data)) = (schema, data) else {
        return Ok(());
    };
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| SchemaError::Compile(err.to_string()))?;
    if let Err(errors) = compiled.validate(data) {
        let listing =
            errors.map(|error| format!("- {error}")).collect::<Vec<_>>().join("\n");
        return Err(SchemaError::Validation(listing));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only schema assertions.")]

    use serde_json::json;

    use super::combine_schemas;
    use super::validate;
    use crate::template::ProtoType;
    use crate::template::TemplateId;

    #[test]
    fn combine_is_idempotent_for_single_schema() {
        let schema = json!({"$schema": super::SCHEMA_VERSION, "type": "object"});
        let combined = combine_schemas(vec![Some(schema.clone()), None]);
        assert_eq!(combined, Some(schema));
    }

    #[test]
    fn combine_wraps_multiple_schemas_in_all_of() {
        let first = json!({"$schema": super::SCHEMA_VERSION, "type": "object"});
        let second = json!({"$schema": super::SCHEMA_VERSION, "type": "object"});
        let combined = combine_schemas(vec![Some(first), Some(second)]).unwrap();
        assert_eq!(combined["$schema"], super::SCHEMA_VERSION);
        let members = combined["allOf"].as_array().unwrap();
        assert_eq!(members.len(), 2);
        for member in members {
            assert!(member.get("$schema").is_none());
        }
    }

    #[test]
    fn validate_accepts_missing_schema_or_data() {
        assert!(validate(None, Some(&json!({"URI": "x"}))).is_ok());
        assert!(validate(Some(&json!({"type": "object"})), None).is_ok());
    }

    #[test]
    fn https_schema_rejects_wrong_scheme() {
        let (_, provider) = TemplateId::Proto(ProtoType::Https).pipe_shapes();
        let schema = super::reflect_shape(&provider.unwrap());
        let err = validate(Some(&schema), Some(&json!({"URI": "ftp://x"}))).unwrap_err();
        assert!(err.to_string().contains("does not match schema"));
        assert!(validate(Some(&schema), Some(&json!({"URI": "https://x"}))).is_ok());
    }
}
