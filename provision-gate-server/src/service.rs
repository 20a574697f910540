// provision-gate-server/src/service.rs
// ============================================================================
// Module: Policy Service
// Description: Business logic for the policy CRUD surface.
// Purpose: Validate requests, keep store and rule runtime in step.
// Dependencies: provision-gate-core, regex, uuid
// ============================================================================

//! ## Overview
//! The policy service sits between the HTTP handlers and the backends. It
//! validates identifiers and priorities, derives the rule package name from
//! the submitted rego module, publishes the module to the rule runtime
//! before persisting the record, and maps store sentinels onto the service
//! error taxonomy rendered by the handlers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use provision_gate_core::CatalogError;
use provision_gate_core::CatalogFilter;
use provision_gate_core::ListOptions;
use provision_gate_core::MAX_PRIORITY;
use provision_gate_core::MIN_PRIORITY;
use provision_gate_core::Policy;
use provision_gate_core::PolicyCatalog;
use provision_gate_core::PolicyId;
use provision_gate_core::PolicyPage;
use provision_gate_core::PolicyStore;
use provision_gate_core::PolicyType;
use provision_gate_core::RulePublisher;
use provision_gate_core::SharedPolicyStore;
use provision_gate_core::StoreError;
use provision_gate_core::Timestamp;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::query;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default listing page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Maximum listing page size.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// AEP-122 resource-id shape for client-assigned policy identifiers.
static POLICY_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap());

/// Package declaration at the top of a rego module.
static PACKAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_.]*)").unwrap());

// ============================================================================
// SECTION: Requests and Errors
// ============================================================================

/// Validated inputs for policy creation.
#[derive(Debug, Clone)]
pub struct CreatePolicy {
    /// Optional client-assigned identifier.
    pub id: Option<String>,
    /// Display name.
    pub display_name: String,
    /// Policy partition.
    pub policy_type: PolicyType,
    /// Optional description.
    pub description: Option<String>,
    /// Evaluation priority.
    pub priority: i64,
    /// Whether the policy is enabled (defaults to true).
    pub enabled: Option<bool>,
    /// Label selector.
    pub label_selector: Option<BTreeMap<String, String>>,
    /// Rego module source.
    pub rego_code: String,
}

/// Partial update applied onto an existing policy.
#[derive(Debug, Clone, Default)]
pub struct UpdatePolicy {
    /// New display name.
    pub display_name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<i64>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New label selector.
    pub label_selector: Option<BTreeMap<String, String>>,
    /// Replacement rego module source.
    pub rego_code: Option<String>,
}

/// Service-layer error taxonomy rendered by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request arguments failed validation.
    #[error("{message}")]
    InvalidArgument {
        /// Short message.
        message: String,
        /// Human-readable detail.
        detail: String,
    },
    /// The referenced policy does not exist.
    #[error("{message}")]
    NotFound {
        /// Short message.
        message: String,
        /// Human-readable detail.
        detail: String,
    },
    /// A uniqueness invariant is violated.
    #[error("{message}")]
    AlreadyExists {
        /// Short message.
        message: String,
        /// Human-readable detail.
        detail: String,
    },
    /// Backend failure.
    #[error("{message}")]
    Internal {
        /// Short message.
        message: String,
        /// Human-readable detail.
        detail: String,
    },
}

impl ServiceError {
    fn invalid(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            detail: detail.into(),
        }
    }

    fn not_found(id: &PolicyId) -> Self {
        Self::NotFound {
            message: "Policy not found".to_string(),
            detail: format!("Policy with ID '{id}' does not exist"),
        }
    }

    fn internal(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// Maps a store sentinel onto the service taxonomy.
fn map_store_error(error: StoreError, id: &PolicyId) -> ServiceError {
    match error {
        StoreError::NotFound(_) => ServiceError::not_found(id),
        StoreError::IdTaken(taken) => ServiceError::AlreadyExists {
            message: "Policy already exists".to_string(),
            detail: format!("A policy with ID '{taken}' already exists"),
        },
        StoreError::DisplayNameTaken => ServiceError::AlreadyExists {
            message: "A policy with this display_name and policy_type already exists".to_string(),
            detail: "The combination of display_name and policy_type must be unique".to_string(),
        },
        StoreError::PriorityTaken => ServiceError::AlreadyExists {
            message: "A policy with this priority and policy_type already exists".to_string(),
            detail: "The combination of priority and policy_type must be unique".to_string(),
        },
        StoreError::Backend(detail) => ServiceError::internal("Policy store failure", detail),
    }
}

// ============================================================================
// SECTION: Policy Service
// ============================================================================

/// Business logic for the policy CRUD surface.
pub struct PolicyService {
    /// Policy store handle.
    store: SharedPolicyStore,
    /// Rule-module publisher handle.
    publisher: Arc<dyn RulePublisher + Send + Sync>,
}

impl PolicyService {
    /// Creates a new policy service.
    #[must_use]
    pub fn new(store: SharedPolicyStore, publisher: Arc<dyn RulePublisher + Send + Sync>) -> Self {
        Self {
            store,
            publisher,
        }
    }

    /// Creates a policy, publishing its rule module first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] on validation failure, uniqueness violation,
    /// or backend failure.
    pub fn create(&self, request: CreatePolicy) -> Result<Policy, ServiceError> {
        let rego_code = request.rego_code.trim();
        if rego_code.is_empty() {
            return Err(ServiceError::invalid(
                "RegoCode is required",
                "The rego_code field must be present and non-empty",
            ));
        }
        let package_name = extract_package_name(rego_code).ok_or_else(|| {
            ServiceError::invalid(
                "RegoCode is missing a package declaration",
                "The rego module must declare a package, e.g. 'package policies.example'",
            )
        })?;
        validate_priority(request.priority)?;

        let id = match request.id {
            Some(client_id) if !client_id.is_empty() => {
                if !POLICY_ID_PATTERN.is_match(&client_id) {
                    return Err(ServiceError::invalid(
                        "Invalid policy ID format",
                        format!(
                            "Policy ID '{client_id}' does not match the required format: 1-63 \
                             characters, start with a lowercase letter, contain only lowercase \
                             letters, numbers, and hyphens, end with a letter or number"
                        ),
                    ));
                }
                PolicyId::new(client_id)
            }
            _ => PolicyId::new(Uuid::new_v4().to_string()),
        };

        let now = now_millis();
        let policy = Policy {
            id: id.clone(),
            policy_type: request.policy_type,
            display_name: request.display_name,
            description: request.description,
            priority: request.priority,
            enabled: request.enabled.unwrap_or(true),
            label_selector: request.label_selector.unwrap_or_default(),
            package_name,
            create_time: now,
            update_time: now,
        };

        self.publisher.put_policy(&id, rego_code).map_err(|error| {
            ServiceError::internal("Failed to store policy module", error.to_string())
        })?;

        match self.store.create(policy) {
            Ok(created) => Ok(created),
            Err(error) => {
                // Roll the module back so the runtime does not keep an
                // orphan program for a record that was never stored.
                let _ = self.publisher.delete_policy(&id);
                Err(map_store_error(error, &id))
            }
        }
    }

    /// Returns a policy by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] when the policy does not exist.
    pub fn get(&self, id: &PolicyId) -> Result<Policy, ServiceError> {
        self.store.get(id).map_err(|error| map_store_error(error, id))
    }

    /// Lists policies with optional filter, ordering, and pagination.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] on invalid parameters or backend failure.
    pub fn list(
        &self,
        filter: Option<&str>,
        order_by: Option<&str>,
        page_size: Option<i64>,
        page_token: Option<String>,
    ) -> Result<PolicyPage, ServiceError> {
        let filter = match filter {
            None => CatalogFilter::default(),
            Some(expression) => query::parse_filter(expression)
                .map_err(|error| ServiceError::invalid("Invalid filter expression", error.to_string()))?,
        };
        let order_by = match order_by {
            None => Vec::new(),
            Some(parameter) => query::parse_order_by(parameter)
                .map_err(|error| ServiceError::invalid("Invalid order_by parameter", error.to_string()))?,
        };
        let page_size = match page_size {
            None => DEFAULT_PAGE_SIZE,
            Some(size) if size < 1 => {
                return Err(ServiceError::invalid(
                    "Invalid page size",
                    "Page size must be at least 1",
                ));
            }
            Some(size) if size > i64::try_from(MAX_PAGE_SIZE).unwrap_or(i64::MAX) => {
                return Err(ServiceError::invalid(
                    "Invalid page size",
                    format!("Page size must not exceed {MAX_PAGE_SIZE}"),
                ));
            }
            Some(size) => usize::try_from(size).unwrap_or(DEFAULT_PAGE_SIZE),
        };

        self.store
            .list(&ListOptions {
                filter,
                order_by,
                page_token,
                page_size,
            })
            .map_err(|error| match error {
                CatalogError::InvalidPageToken(token) => ServiceError::invalid(
                    "Invalid page token",
                    format!("Page token '{token}' is not valid"),
                ),
                other => ServiceError::internal("Failed to list policies", other.to_string()),
            })
    }

    /// Applies a partial update to an existing policy.
    ///
    /// `policy_type` is immutable; when `rego_code` is present the module is
    /// republished and the package name refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] on validation failure, missing policy, or
    /// backend failure.
    pub fn update(&self, id: &PolicyId, patch: UpdatePolicy) -> Result<Policy, ServiceError> {
        if let Some(rego_code) = patch.rego_code.as_deref()
            && rego_code.trim().is_empty()
        {
            return Err(ServiceError::invalid(
                "RegoCode cannot be empty",
                "When rego_code is provided in the patch it must be non-empty",
            ));
        }
        if let Some(priority) = patch.priority {
            validate_priority(priority)?;
        }

        let mut merged = self.store.get(id).map_err(|error| map_store_error(error, id))?;
        if let Some(display_name) = patch.display_name {
            merged.display_name = display_name;
        }
        if let Some(description) = patch.description {
            merged.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            merged.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            merged.enabled = enabled;
        }
        if let Some(label_selector) = patch.label_selector {
            merged.label_selector = label_selector;
        }
        if let Some(rego_code) = patch.rego_code.as_deref() {
            let rego_code = rego_code.trim();
            merged.package_name = extract_package_name(rego_code).ok_or_else(|| {
                ServiceError::invalid(
                    "RegoCode is missing a package declaration",
                    "The rego module must declare a package, e.g. 'package policies.example'",
                )
            })?;
            self.publisher.put_policy(id, rego_code).map_err(|error| {
                ServiceError::internal("Failed to store policy module", error.to_string())
            })?;
        }
        merged.update_time = now_millis();

        self.store.update(merged).map_err(|error| map_store_error(error, id))
    }

    /// Deletes a policy record and its rule module.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the policy does not exist or a backend
    /// fails.
    pub fn delete(&self, id: &PolicyId) -> Result<(), ServiceError> {
        self.store.delete(id).map_err(|error| map_store_error(error, id))?;
        self.publisher.delete_policy(id).map_err(|error| {
            ServiceError::internal("Failed to delete policy module", error.to_string())
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates the priority range.
fn validate_priority(priority: i64) -> Result<(), ServiceError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(ServiceError::invalid(
            "Invalid priority",
            format!("Priority must be in [{MIN_PRIORITY}, {MAX_PRIORITY}], got {priority}"),
        ));
    }
    Ok(())
}

/// Extracts the package name from a rego module's package declaration.
fn extract_package_name(rego_code: &str) -> Option<String> {
    PACKAGE_PATTERN.captures(rego_code).map(|captures| captures[1].to_string())
}

/// Returns the current wall-clock time in unix milliseconds.
fn now_millis() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    Timestamp::from_unix_millis(millis)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Panic-based assertions are permitted in tests.")]

    use super::*;

    /// Tests package-name extraction from rego modules.
    #[test]
    fn test_extract_package_name() {
        let rego = "# comment\npackage policies.cost_control\n\nmain := {\"rejected\": false}\n";
        assert_eq!(extract_package_name(rego).as_deref(), Some("policies.cost_control"));

        assert_eq!(extract_package_name("main := true"), None);
    }

    /// Tests the priority range validation.
    #[test]
    fn test_validate_priority() {
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(1_000).is_ok());
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(1_001).is_err());
    }

    /// Tests the AEP-122 identifier shape.
    #[test]
    fn test_policy_id_pattern() {
        assert!(POLICY_ID_PATTERN.is_match("cost-control"));
        assert!(POLICY_ID_PATTERN.is_match("a"));
        assert!(POLICY_ID_PATTERN.is_match("p1"));
        assert!(!POLICY_ID_PATTERN.is_match("1starts-with-digit"));
        assert!(!POLICY_ID_PATTERN.is_match("ends-with-hyphen-"));
        assert!(!POLICY_ID_PATTERN.is_match("Has-Uppercase"));
        assert!(!POLICY_ID_PATTERN.is_match(&"a".repeat(64)));
    }
}
