// provision-gate-core/src/core/decision.rs
// ============================================================================
// Module: Provision Gate Policy Decision
// Description: Per-policy decision document returned by the rule runtime.
// Purpose: Parse rule results leniently into a stable decision shape.
// Dependencies: serde_json, crate::core::instance
// ============================================================================

//! ## Overview
//! Each rule program returns a mapping with a handful of recognized keys.
//! Absent or mistyped keys fall back to defaults so that policies only need
//! to populate the fields they act on. Unrecognized keys are ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::instance::JsonObject;

// ============================================================================
// SECTION: Service Provider Constraints
// ============================================================================

/// Constraints on which service providers a policy admits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceProviderConstraints {
    /// Provider names admitted by this policy.
    pub allow_list: Vec<String>,
    /// Regex patterns the selected provider must match (conjunction).
    pub patterns: Vec<String>,
}

impl ServiceProviderConstraints {
    /// Returns true when neither an allow list nor patterns are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow_list.is_empty() && self.patterns.is_empty()
    }
}

// ============================================================================
// SECTION: Policy Decision
// ============================================================================

/// Decision document produced by one policy evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    /// Whether the policy rejects the request outright.
    pub rejected: bool,
    /// Human-readable rejection reason.
    pub rejection_reason: String,
    /// RFC 7396 merge patch to apply to the current service instance.
    pub patch: Option<JsonObject>,
    /// Per-field JSON Schema constraints keyed by dotted field path.
    pub constraints: Option<JsonObject>,
    /// Service provider constraints.
    pub service_provider_constraints: Option<ServiceProviderConstraints>,
    /// Provider selected by this policy, empty when none.
    pub selected_provider: String,
}

impl PolicyDecision {
    /// Parses a decision from a rule-runtime result mapping.
    ///
    /// Recognized keys with wrong value types are treated as absent. The
    /// provider constraint block accepts `patterns: [string]` and the legacy
    /// singular `pattern: string` shim; both accumulate identically.
    #[must_use]
    pub fn parse(result: &JsonObject) -> Self {
        let mut decision = Self::default();

        if let Some(rejected) = result.get("rejected").and_then(Value::as_bool) {
            decision.rejected = rejected;
        }
        if let Some(reason) = result.get("rejection_reason").and_then(Value::as_str) {
            decision.rejection_reason = reason.to_string();
        }
        if let Some(patch) = result.get("patch").and_then(Value::as_object) {
            decision.patch = Some(patch.clone());
        }
        if let Some(constraints) = result.get("constraints").and_then(Value::as_object) {
            decision.constraints = Some(constraints.clone());
        }
        if let Some(block) = result.get("service_provider_constraints").and_then(Value::as_object) {
            decision.service_provider_constraints = Some(parse_provider_constraints(block));
        }
        if let Some(provider) = result.get("selected_provider").and_then(Value::as_str) {
            decision.selected_provider = provider.to_string();
        }

        decision
    }
}

/// Parses the provider constraint block of a decision.
fn parse_provider_constraints(block: &JsonObject) -> ServiceProviderConstraints {
    let mut constraints = ServiceProviderConstraints::default();

    if let Some(allow_list) = block.get("allow_list").and_then(Value::as_array) {
        for entry in allow_list {
            if let Some(name) = entry.as_str() {
                constraints.allow_list.push(name.to_string());
            }
        }
    }
    if let Some(patterns) = block.get("patterns").and_then(Value::as_array) {
        for entry in patterns {
            if let Some(pattern) = entry.as_str() {
                constraints.patterns.push(pattern.to_string());
            }
        }
    }
    // Compatibility shim for older rule programs emitting a single pattern.
    if let Some(pattern) = block.get("pattern").and_then(Value::as_str) {
        constraints.patterns.push(pattern.to_string());
    }

    constraints
}
