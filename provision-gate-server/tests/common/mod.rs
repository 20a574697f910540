// provision-gate-server/tests/common/mod.rs
// ============================================================================
// Module: Server Test Helpers
// Description: Scripted backends and listener spawning for handler tests.
// ============================================================================
//! ## Overview
//! Provides an in-process listener harness plus scripted rule-runtime and
//! recording publisher implementations for exercising both routers over
//! real HTTP.

#![allow(dead_code, reason = "Each integration test binary uses a subset of the helpers.")]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use axum::Router;
use provision_gate_core::JsonObject;
use provision_gate_core::PolicyId;
use provision_gate_core::RulePublisher;
use provision_gate_core::RuleRuntime;
use provision_gate_core::RuntimeError;
use serde_json::Value;

/// Spawns a router on an ephemeral loopback port and returns its base URL.
pub async fn spawn_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// Scripted rule runtime returning canned decisions per package name.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRuleRuntime {
    decisions: BTreeMap<String, Value>,
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
}

impl RuleRuntime for ScriptedRuleRuntime {
    fn evaluate(
        &self,
        package_name: &str,
        _input: &Value,
    ) -> Result<Option<JsonObject>, RuntimeError> {
        Ok(self.decisions.get(package_name).and_then(Value::as_object).cloned())
    }
}

/// Publisher recording module writes and deletes.
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    puts: Arc<Mutex<Vec<(String, String)>>>,
    deletes: Arc<Mutex<Vec<String>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded `(policy_id, source)` writes.
    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    /// Returns the recorded deleted policy ids.
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

impl RulePublisher for RecordingPublisher {
    fn put_policy(&self, id: &PolicyId, source: &str) -> Result<(), RuntimeError> {
        self.puts.lock().unwrap().push((id.as_str().to_string(), source.to_string()));
        Ok(())
    }

    fn delete_policy(&self, id: &PolicyId) -> Result<(), RuntimeError> {
        self.deletes.lock().unwrap().push(id.as_str().to_string());
        Ok(())
    }
}
