// provision-gate-core/src/runtime/constraints.rs
// ============================================================================
// Module: Provision Gate Constraint Context
// Description: Tighten-only accumulation of field and provider constraints.
// Purpose: Validate proposed modifications against higher-priority bindings.
// Dependencies: jsonschema, regex, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The constraint context accumulates per-field JSON Schema fragments and
//! service-provider constraints as policies evaluate in precedence order.
//! Merging is tighten-only: a later policy may narrow what an earlier policy
//! bound but never widen it. Each recognized schema keyword carries its own
//! merge algebra, dispatched by keyword name; unknown keywords pass through
//! verbatim and contribute no tightening guarantee.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use jsonschema::Draft;
use jsonschema::Validator;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::core::JsonObject;
use crate::core::PolicyId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Conflict raised when a policy would loosen an accumulated field constraint.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ConstraintConflict {
    /// Field path that caused the conflict.
    pub field_path: String,
    /// Policy that set the existing constraint.
    pub set_by: PolicyId,
    /// Human-readable detail.
    pub reason: String,
}

/// A single patch-field violation of an accumulated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    /// Field path of the violating patch entry.
    pub field_path: String,
    /// Policy that set the violated constraint.
    pub set_by: PolicyId,
    /// Human-readable detail.
    pub reason: String,
}

/// Conflict raised by service-provider constraint merging or validation.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProviderConflict {
    /// Policy that established the binding constraint.
    pub set_by: PolicyId,
    /// Human-readable detail.
    pub reason: String,
}

// ============================================================================
// SECTION: Constraint Context
// ============================================================================

/// Accumulated service-provider constraints.
#[derive(Debug, Clone)]
struct ProviderState {
    /// Intersection of all allow lists seen so far.
    allow_list: Vec<String>,
    /// All patterns seen so far (conjunction).
    patterns: Vec<String>,
    /// Policy that first set provider constraints.
    set_by: PolicyId,
}

/// Per-request accumulator of field and provider constraints.
///
/// A fresh context is built for every evaluation request; sharing one across
/// requests would leak higher-priority bindings into unrelated evaluations.
#[derive(Debug, Default)]
pub struct ConstraintContext {
    /// Field path to accumulated JSON Schema fragment.
    field_constraints: BTreeMap<String, JsonObject>,
    /// Field path to the policy that first constrained it.
    set_by: BTreeMap<String, PolicyId>,
    /// Accumulated provider constraints.
    provider: Option<ProviderState>,
}

impl ConstraintContext {
    /// Creates an empty constraint context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges new per-field constraints from a policy decision.
    ///
    /// A previously unseen field path stores a copy of the fragment and
    /// records the contributing policy. Existing paths merge keyword by
    /// keyword under the tighten-only discipline.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintConflict`] on the first keyword that would loosen
    /// an accumulated constraint.
    pub fn merge_constraints(
        &mut self,
        new_constraints: &JsonObject,
        policy_id: &PolicyId,
    ) -> Result<(), ConstraintConflict> {
        for (field_path, fragment) in new_constraints {
            let Some(new_schema) = fragment.as_object() else {
                continue;
            };

            match self.field_constraints.get(field_path) {
                None => {
                    self.field_constraints.insert(field_path.clone(), new_schema.clone());
                    self.set_by.insert(field_path.clone(), policy_id.clone());
                }
                Some(existing) => {
                    let set_by = self
                        .set_by
                        .get(field_path)
                        .cloned()
                        .unwrap_or_else(|| policy_id.clone());
                    let merged = merge_schema_keywords(existing, new_schema, field_path, &set_by)?;
                    self.field_constraints.insert(field_path.clone(), merged);
                }
            }
        }
        Ok(())
    }

    /// Validates a merge patch against the accumulated field constraints.
    ///
    /// The patch tree is walked recursively so that nested paths such as
    /// `a.b.c` are reached. Each constrained path validates with a compiled
    /// JSON Schema validator cached for the duration of this call. The
    /// returned list is empty iff the patch is consistent with every
    /// accumulated constraint.
    #[must_use]
    pub fn validate_patch(&self, patch: &JsonObject) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        let mut compiled: HashMap<String, Validator> = HashMap::new();
        self.validate_patch_inner("", patch, &mut violations, &mut compiled);
        violations
    }

    /// Recursively validates patch fields against constraints.
    fn validate_patch_inner(
        &self,
        prefix: &str,
        patch: &JsonObject,
        violations: &mut Vec<ConstraintViolation>,
        compiled: &mut HashMap<String, Validator>,
    ) {
        for (key, value) in patch {
            let field_path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            if let Some(fragment) = self.field_constraints.get(&field_path) {
                let set_by = self
                    .set_by
                    .get(&field_path)
                    .cloned()
                    .unwrap_or_else(|| PolicyId::new(""));
                match compiled_validator(compiled, &field_path, fragment) {
                    Ok(validator) => {
                        if let Err(error) = validator.validate(value) {
                            violations.push(ConstraintViolation {
                                field_path: field_path.clone(),
                                set_by,
                                reason: format!("value {value} violates constraint: {error}"),
                            });
                        }
                    }
                    Err(reason) => {
                        violations.push(ConstraintViolation {
                            field_path: field_path.clone(),
                            set_by,
                            reason,
                        });
                    }
                }
            }

            if let Some(nested) = value.as_object() {
                self.validate_patch_inner(&field_path, nested, violations, compiled);
            }
        }
    }

    /// Merges service-provider constraints from a policy decision.
    ///
    /// Allow lists intersect (an empty intersection is a conflict); when only
    /// one side has an allow list the existing one is kept, otherwise the new
    /// one is adopted. Patterns always accumulate as a conjunction.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderConflict`] when the allow-list intersection is empty.
    pub fn merge_provider_constraints(
        &mut self,
        allow_list: &[String],
        patterns: &[String],
        policy_id: &PolicyId,
    ) -> Result<(), ProviderConflict> {
        if allow_list.is_empty() && patterns.is_empty() {
            return Ok(());
        }

        let Some(state) = self.provider.as_mut() else {
            self.provider = Some(ProviderState {
                allow_list: allow_list.to_vec(),
                patterns: patterns.to_vec(),
                set_by: policy_id.clone(),
            });
            return Ok(());
        };

        if !allow_list.is_empty() && !state.allow_list.is_empty() {
            let intersected: Vec<String> = state
                .allow_list
                .iter()
                .filter(|existing| allow_list.contains(*existing))
                .cloned()
                .collect();
            if intersected.is_empty() {
                return Err(ProviderConflict {
                    set_by: state.set_by.clone(),
                    reason: format!(
                        "service provider allow list intersection is empty: policy '{}' allows \
                         {:?} but existing constraints from policy '{}' allow {:?}",
                        policy_id, allow_list, state.set_by, state.allow_list
                    ),
                });
            }
            state.allow_list = intersected;
        } else if !allow_list.is_empty() {
            state.allow_list = allow_list.to_vec();
        }

        state.patterns.extend(patterns.iter().cloned());
        Ok(())
    }

    /// Validates a selected provider against the accumulated constraints.
    ///
    /// Succeeds when the provider is empty or no provider constraints exist;
    /// otherwise the provider must be in the allow list (when present) and
    /// match every accumulated pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderConflict`] naming the binding policy when the
    /// provider is not admitted.
    pub fn validate_service_provider(&self, provider: &str) -> Result<(), ProviderConflict> {
        let Some(state) = self.provider.as_ref() else {
            return Ok(());
        };
        if provider.is_empty() {
            return Ok(());
        }

        if !state.allow_list.is_empty() && !state.allow_list.iter().any(|entry| entry == provider)
        {
            return Err(ProviderConflict {
                set_by: state.set_by.clone(),
                reason: format!(
                    "provider '{}' is not in the allowed list {:?} (constrained by policy '{}')",
                    provider, state.allow_list, state.set_by
                ),
            });
        }

        for pattern in &state.patterns {
            let compiled = Regex::new(pattern).map_err(|error| ProviderConflict {
                set_by: state.set_by.clone(),
                reason: format!("invalid service provider pattern '{pattern}': {error}"),
            })?;
            if !compiled.is_match(provider) {
                return Err(ProviderConflict {
                    set_by: state.set_by.clone(),
                    reason: format!(
                        "provider '{provider}' does not match required pattern '{pattern}' \
                         (constrained by policy '{}')",
                        state.set_by
                    ),
                });
            }
        }

        Ok(())
    }

    /// Returns the accumulated field constraints for rule-input assembly.
    #[must_use]
    pub fn constraints_map(&self) -> Option<Value> {
        if self.field_constraints.is_empty() {
            return None;
        }
        let mut result = JsonObject::new();
        for (field_path, fragment) in &self.field_constraints {
            result.insert(field_path.clone(), Value::Object(fragment.clone()));
        }
        Some(Value::Object(result))
    }

    /// Returns the accumulated provider constraints for rule-input assembly.
    #[must_use]
    pub fn provider_constraints_map(&self) -> Option<Value> {
        let state = self.provider.as_ref()?;
        let mut result = JsonObject::new();
        if !state.allow_list.is_empty() {
            result.insert(
                "allow_list".to_string(),
                Value::Array(state.allow_list.iter().cloned().map(Value::String).collect()),
            );
        }
        if !state.patterns.is_empty() {
            result.insert(
                "patterns".to_string(),
                Value::Array(state.patterns.iter().cloned().map(Value::String).collect()),
            );
        }
        Some(Value::Object(result))
    }

    /// Returns the policy that first constrained a field path, if any.
    #[must_use]
    pub fn constraint_set_by(&self, field_path: &str) -> Option<&PolicyId> {
        self.set_by.get(field_path)
    }
}

// ============================================================================
// SECTION: Keyword Merge Algebra
// ============================================================================

/// Merges JSON Schema keywords under the tighten-only discipline.
fn merge_schema_keywords(
    existing: &JsonObject,
    new: &JsonObject,
    field_path: &str,
    set_by: &PolicyId,
) -> Result<JsonObject, ConstraintConflict> {
    let mut merged = existing.clone();

    for (keyword, new_value) in new {
        let Some(existing_value) = merged.get(keyword).cloned() else {
            merged.insert(keyword.clone(), new_value.clone());
            continue;
        };

        match keyword.as_str() {
            "const" => {
                if existing_value != *new_value {
                    return Err(ConstraintConflict {
                        field_path: field_path.to_string(),
                        set_by: set_by.clone(),
                        reason: format!(
                            "cannot change const constraint on field '{field_path}': existing \
                             value {existing_value} (set by policy '{set_by}') differs from new \
                             value {new_value}"
                        ),
                    });
                }
            }
            "enum" => {
                if let (Some(existing_enum), Some(new_enum)) =
                    (existing_value.as_array(), new_value.as_array())
                {
                    let intersected: Vec<Value> = existing_enum
                        .iter()
                        .filter(|entry| new_enum.contains(*entry))
                        .cloned()
                        .collect();
                    if intersected.is_empty() {
                        return Err(ConstraintConflict {
                            field_path: field_path.to_string(),
                            set_by: set_by.clone(),
                            reason: format!(
                                "enum constraint intersection is empty for field '{field_path}': \
                                 existing {existing_value} (set by policy '{set_by}'), new \
                                 {new_value}"
                            ),
                        });
                    }
                    merged.insert(keyword.clone(), Value::Array(intersected));
                }
            }
            "minimum" | "minLength" | "minItems" | "minProperties" | "exclusiveMinimum" => {
                if let (Some(existing_num), Some(new_num)) =
                    (existing_value.as_f64(), new_value.as_f64())
                {
                    if new_num < existing_num {
                        return Err(loosen_conflict(
                            keyword,
                            field_path,
                            set_by,
                            existing_num,
                            new_num,
                        ));
                    }
                    merged.insert(keyword.clone(), number_value(existing_num.max(new_num)));
                }
            }
            "maximum" | "maxLength" | "maxItems" | "maxProperties" | "exclusiveMaximum" => {
                if let (Some(existing_num), Some(new_num)) =
                    (existing_value.as_f64(), new_value.as_f64())
                {
                    if new_num > existing_num {
                        return Err(loosen_conflict(
                            keyword,
                            field_path,
                            set_by,
                            existing_num,
                            new_num,
                        ));
                    }
                    merged.insert(keyword.clone(), number_value(existing_num.min(new_num)));
                }
            }
            "multipleOf" => {
                if let (Some(existing_num), Some(new_num)) =
                    (existing_value.as_f64(), new_value.as_f64())
                    && existing_num != 0.0
                {
                    if new_num % existing_num != 0.0 {
                        return Err(ConstraintConflict {
                            field_path: field_path.to_string(),
                            set_by: set_by.clone(),
                            reason: format!(
                                "multipleOf {new_num} is not a multiple of existing \
                                 {existing_num} on field '{field_path}' (set by policy \
                                 '{set_by}')"
                            ),
                        });
                    }
                    merged.insert(keyword.clone(), number_value(new_num));
                }
            }
            "pattern" => {
                if let (Some(existing_pattern), Some(new_pattern)) =
                    (existing_value.as_str(), new_value.as_str())
                    && existing_pattern != new_pattern
                {
                    append_pattern_conjunction(&mut merged, existing_pattern, new_pattern);
                }
            }
            _ => {
                // Unknown or unmerged keywords: the new value overrides with
                // no tightening guarantee.
                merged.insert(keyword.clone(), new_value.clone());
            }
        }
    }

    Ok(merged)
}

/// Builds a loosening conflict for a range keyword.
fn loosen_conflict(
    keyword: &str,
    field_path: &str,
    set_by: &PolicyId,
    existing: f64,
    attempted: f64,
) -> ConstraintConflict {
    ConstraintConflict {
        field_path: field_path.to_string(),
        set_by: set_by.clone(),
        reason: format!(
            "cannot loosen {keyword} constraint on field '{field_path}': existing {existing} \
             (set by policy '{set_by}'), attempted {attempted}"
        ),
    }
}

/// Stores an additional pattern as an `allOf` conjunction.
///
/// The first pattern stays at the top level so the fragment remains readable
/// to rule programs observing the constraint projection.
fn append_pattern_conjunction(merged: &mut JsonObject, existing: &str, new_pattern: &str) {
    let clause = |pattern: &str| {
        let mut entry = JsonObject::new();
        entry.insert("pattern".to_string(), Value::String(pattern.to_string()));
        Value::Object(entry)
    };

    match merged.get_mut("allOf").and_then(Value::as_array_mut) {
        Some(all_of) => all_of.push(clause(new_pattern)),
        None => {
            merged.insert(
                "allOf".to_string(),
                Value::Array(vec![clause(existing), clause(new_pattern)]),
            );
        }
    }
}

/// Converts a float back into a JSON number, preferring integer form.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0
        && value >= i64::MIN as f64
        && value <= i64::MAX as f64
    {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

// ============================================================================
// SECTION: Validator Cache
// ============================================================================

/// Returns the compiled validator for a field path, compiling on first use.
fn compiled_validator<'cache>(
    cache: &'cache mut HashMap<String, Validator>,
    field_path: &str,
    fragment: &JsonObject,
) -> Result<&'cache Validator, String> {
    match cache.entry(field_path.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let schema = Value::Object(fragment.clone());
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema)
                .map_err(|error| format!("failed to compile constraint schema: {error}"))?;
            Ok(entry.insert(validator))
        }
    }
}
