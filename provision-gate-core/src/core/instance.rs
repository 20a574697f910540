// provision-gate-core/src/core/instance.rs
// ============================================================================
// Module: Provision Gate Service Instance Helpers
// Description: Open service-instance mapping, merge patch, label extraction.
// Purpose: Provide RFC 7396 patch semantics and request-label derivation.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! A service instance is an open JSON mapping with a required `service_type`
//! string and an optional `metadata.labels` mapping. Policies modify the
//! instance through RFC 7396 merge patches: nested mappings merge
//! recursively, `null` leaves delete keys, and every other value replaces.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Open JSON mapping used for service-instance specs and rule documents.
pub type JsonObject = Map<String, Value>;

/// Request-label extraction errors.
#[derive(Debug, Error)]
pub enum LabelError {
    /// The service instance is missing the required `service_type` string.
    #[error("service type is required")]
    MissingServiceType,
}

// ============================================================================
// SECTION: Merge Patch
// ============================================================================

/// Applies an RFC 7396 JSON Merge Patch to a base mapping.
///
/// Fields in the patch override fields in the base. `null` values remove
/// fields. Fields not mentioned in the patch are preserved. Neither input is
/// mutated; the result is a fresh deep copy.
#[must_use]
pub fn merge_patch(base: &JsonObject, patch: &JsonObject) -> JsonObject {
    let mut result = base.clone();
    for (key, patch_value) in patch {
        if patch_value.is_null() {
            result.remove(key);
            continue;
        }
        match (result.get(key).and_then(Value::as_object), patch_value.as_object()) {
            (Some(base_nested), Some(patch_nested)) => {
                result.insert(key.clone(), Value::Object(merge_patch(base_nested, patch_nested)));
            }
            _ => {
                result.insert(key.clone(), patch_value.clone());
            }
        }
    }
    result
}

// ============================================================================
// SECTION: Request Labels
// ============================================================================

/// Derives request labels from `service_type` plus `metadata.labels`.
///
/// Label values that are not strings are silently dropped.
///
/// # Errors
///
/// Returns [`LabelError::MissingServiceType`] when `service_type` is absent
/// or not a string.
pub fn extract_request_labels(spec: &JsonObject) -> Result<BTreeMap<String, String>, LabelError> {
    let service_type = spec
        .get("service_type")
        .and_then(Value::as_str)
        .ok_or(LabelError::MissingServiceType)?;

    let mut labels = BTreeMap::new();
    labels.insert("service_type".to_string(), service_type.to_string());

    if let Some(metadata) = spec.get("metadata").and_then(Value::as_object)
        && let Some(raw_labels) = metadata.get("labels").and_then(Value::as_object)
    {
        for (key, value) in raw_labels {
            if let Some(text) = value.as_str() {
                labels.insert(key.clone(), text.to_string());
            }
        }
    }

    Ok(labels)
}
