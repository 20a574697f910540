// provision-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Helpers
// Description: Scripted rule runtime and policy builders shared by tests.
// ============================================================================
//! ## Overview
//! Provides a deterministic scripted rule runtime and policy record builders
//! for evaluator and catalog tests.

#![allow(dead_code, reason = "Each integration test binary uses a subset of the helpers.")]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use provision_gate_core::JsonObject;
use provision_gate_core::Policy;
use provision_gate_core::PolicyId;
use provision_gate_core::PolicyType;
use provision_gate_core::RuleRuntime;
use provision_gate_core::RuntimeError;
use provision_gate_core::Timestamp;
use serde_json::Value;

/// Scripted rule runtime returning canned decisions per package name.
///
/// Packages without a canned decision evaluate as undefined. Every
/// invocation is recorded so tests can assert on the assembled rule input.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRuleRuntime {
    decisions: BTreeMap<String, Value>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedRuleRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a canned decision for a package name.
    #[must_use]
    pub fn with_decision(mut self, package_name: &str, decision: Value) -> Self {
        self.decisions.insert(package_name.to_string(), decision);
        self
    }

    /// Returns the recorded `(package_name, input)` invocations.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RuleRuntime for ScriptedRuleRuntime {
    fn evaluate(
        &self,
        package_name: &str,
        input: &Value,
    ) -> Result<Option<JsonObject>, RuntimeError> {
        self.calls.lock().unwrap().push((package_name.to_string(), input.clone()));
        Ok(self.decisions.get(package_name).and_then(Value::as_object).cloned())
    }
}

/// Builds an enabled policy record with an empty label selector.
pub fn policy(id: &str, policy_type: PolicyType, priority: i64) -> Policy {
    Policy {
        id: PolicyId::new(id),
        policy_type,
        display_name: id.to_string(),
        description: None,
        priority,
        enabled: true,
        label_selector: BTreeMap::new(),
        package_name: format!("policies.{}", id.replace('-', "_")),
        create_time: Timestamp::from_unix_millis(0),
        update_time: Timestamp::from_unix_millis(0),
    }
}

/// Converts a JSON value into an object mapping.
pub fn object(value: Value) -> JsonObject {
    value.as_object().cloned().unwrap_or_default()
}
