//! JSON Schema validation for manifests and image indexes.
//!
//! Every manifest or index fetched from, or about to be uploaded to, a
//! registry passes through here. A validation failure is reported as
//! [`Error::ManifestSchemaInvalid`].

use jsonschema::Validator;
use serde_json::{Value, json};

use crate::{Error, Result};

fn descriptor_properties() -> Value {
    json!({
        "mediaType": {"type": "string"},
        "digest": {"type": "string", "pattern": "^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$"},
        "size": {"type": "integer", "minimum": 0},
        "urls": {"type": "array", "items": {"type": "string"}},
        "annotations": {"type": ["object", "null"]},
        "data": {"type": "string"},
        "artifactType": {"type": "string"},
    })
}

/// Schema for OCI image manifests.
#[must_use]
pub fn manifest_schema() -> Value {
    let descriptor = json!({
        "type": "object",
        "properties": descriptor_properties(),
        "required": ["mediaType", "digest", "size"],
    });

    json!({
        "title": "Manifest Schema",
        "type": "object",
        "properties": {
            "schemaVersion": {"type": "number"},
            "mediaType": {"type": "string"},
            "artifactType": {"type": ["null", "string"]},
            "config": descriptor,
            "layers": {"type": "array", "items": descriptor},
            "subject": {"type": ["null", "object"]},
            "annotations": {"type": ["object", "null", "array"]},
        },
        "required": ["schemaVersion", "config", "layers"],
        "additionalProperties": true,
    })
}

/// Schema for OCI image indexes.
///
/// Entries must be descriptors, may carry a `platform`, and must not carry
/// `layers` or `config`.
#[must_use]
pub fn image_index_schema() -> Value {
    let mut entry_properties = descriptor_properties();
    entry_properties["platform"] = json!({
        "type": "object",
        "properties": {
            "architecture": {"type": "string"},
            "os": {"type": "string"},
            "os.version": {"type": "string"},
            "os.features": {"type": "array", "items": {"type": "string"}},
            "variant": {"type": "string"},
            "features": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["architecture", "os"],
    });

    json!({
        "title": "Index Schema",
        "type": "object",
        "properties": {
            "schemaVersion": {"type": "number"},
            "mediaType": {"type": "string"},
            "artifactType": {"type": ["null", "string"]},
            "subject": {"type": ["null", "object"]},
            "annotations": {"type": ["object", "null", "array"]},
            "manifests": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": entry_properties,
                    "required": ["mediaType", "digest", "size"],
                    "not": {"anyOf": [{"required": ["layers"]}, {"required": ["config"]}]},
                },
            },
        },
        "required": ["schemaVersion", "manifests"],
        "additionalProperties": true,
    })
}

/// Validate an image manifest document.
pub fn validate_manifest(document: &Value) -> Result<()> {
    validate("manifest", &manifest_schema(), document)
}

/// Validate an image index document.
pub fn validate_image_index(document: &Value) -> Result<()> {
    validate("image index", &image_index_schema(), document)
}

fn validate(kind: &'static str, schema: &Value, document: &Value) -> Result<()> {
    let validator: Validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::schema_invalid(kind, format!("invalid schema: {e}")))?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| format!("{} (at '{}')", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::schema_invalid(kind, errors.join("; ")))
    }
}
