// provision-gate-opa/src/client.rs
// ============================================================================
// Module: OPA Rule Runtime Client
// Description: Bounded blocking HTTP client for OPA evaluation and modules.
// Purpose: Evaluate policy packages and manage rego modules with strict limits.
// Dependencies: provision-gate-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! The OPA client issues bounded, timeout-guarded requests against an
//! OPA-compatible HTTP API. Evaluation queries the `main` document of the
//! policy package; a response without a `result` member is an undefined
//! decision and skips the policy. Module publish and delete back the CRUD
//! surface. Scheme restrictions keep the runtime endpoint local or TLS.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use provision_gate_core::JsonObject;
use provision_gate_core::PolicyId;
use provision_gate_core::RulePublisher;
use provision_gate_core::RuleRuntime;
use provision_gate_core::RuntimeError;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default OPA endpoint for local development.
pub const DEFAULT_OPA_URL: &str = "http://127.0.0.1:8181";
/// Default request timeout for rule evaluation.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Configuration for the OPA client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpaConfig {
    /// Base URL of the OPA HTTP API.
    pub url: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OpaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OPA_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Returns the default rule-runtime timeout.
const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// OPA client construction errors.
#[derive(Debug, Error)]
pub enum OpaClientError {
    /// Base URL failed to parse or uses an unsupported scheme.
    #[error("invalid opa url: {0}")]
    InvalidUrl(String),
    /// HTTP client construction failed.
    #[error("opa http client build failed: {0}")]
    ClientBuild(String),
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking OPA client implementing the rule-runtime interfaces.
#[derive(Debug)]
pub struct OpaClient {
    /// Validated base URL of the OPA API.
    base: Url,
    /// HTTP client with the configured timeout.
    client: Client,
}

impl OpaClient {
    /// Creates a new OPA client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OpaClientError`] when the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &OpaConfig) -> Result<Self, OpaClientError> {
        let base = Url::parse(&config.url)
            .map_err(|error| OpaClientError::InvalidUrl(error.to_string()))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(OpaClientError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )));
            }
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|error| OpaClientError::ClientBuild(error.to_string()))?;
        Ok(Self {
            base,
            client,
        })
    }

    /// Builds the data-document URL for a policy package.
    fn data_url(&self, package_name: &str) -> Result<Url, RuntimeError> {
        let package_path = package_name.replace('.', "/");
        self.base
            .join(&format!("v1/data/{package_path}/main"))
            .map_err(|error| RuntimeError::Request(error.to_string()))
    }

    /// Builds the policy-module URL for a policy identifier.
    fn policy_url(&self, id: &PolicyId) -> Result<Url, RuntimeError> {
        self.base
            .join(&format!("v1/policies/{id}"))
            .map_err(|error| RuntimeError::Request(error.to_string()))
    }
}

impl RuleRuntime for OpaClient {
    fn evaluate(
        &self,
        package_name: &str,
        input: &Value,
    ) -> Result<Option<JsonObject>, RuntimeError> {
        let url = self.data_url(package_name)?;
        let response = self
            .client
            .post(url)
            .json(&json!({"input": input}))
            .send()
            .map_err(|error| RuntimeError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response));
        }

        let body: Value = response
            .json()
            .map_err(|error| RuntimeError::Decode(error.to_string()))?;
        match body.get("result") {
            // No result member: the decision is undefined, skip the policy.
            None => Ok(None),
            Some(Value::Object(result)) => Ok(Some(result.clone())),
            Some(other) => Err(RuntimeError::Decode(format!(
                "expected object decision, got {other}"
            ))),
        }
    }
}

impl RulePublisher for OpaClient {
    fn put_policy(&self, id: &PolicyId, source: &str) -> Result<(), RuntimeError> {
        let url = self.policy_url(id)?;
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(source.to_string())
            .send()
            .map_err(|error| RuntimeError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response));
        }
        Ok(())
    }

    fn delete_policy(&self, id: &PolicyId) -> Result<(), RuntimeError> {
        let url = self.policy_url(id)?;
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|error| RuntimeError::Request(error.to_string()))?;
        let status = response.status();
        // A missing module counts as already deleted.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(status_error(status, response));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maximum response-body length carried in a status error.
const MAX_ERROR_DETAIL_CHARS: usize = 512;

/// Builds a status error carrying a bounded slice of the response body.
fn status_error(status: StatusCode, response: Response) -> RuntimeError {
    let body = response.text().unwrap_or_default();
    let detail = if body.chars().count() > MAX_ERROR_DETAIL_CHARS {
        body.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
    } else {
        body
    };
    RuntimeError::Status {
        status: status.as_u16(),
        detail,
    }
}
