// provision-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Provision Gate Interfaces
// Description: Backend-agnostic interfaces for policy storage and rules.
// Purpose: Define the contract surfaces consumed by the evaluation runtime.
// Dependencies: crate::core, base64, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the evaluation core integrates with the policy
//! store and the external rule runtime without embedding backend details.
//! Implementations must be safe for concurrent readers: the catalog is
//! read-only during a request while CRUD writes may interleave.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use thiserror::Error;

use crate::core::JsonObject;
use crate::core::Policy;
use crate::core::PolicyId;
use crate::core::PolicyType;

// ============================================================================
// SECTION: Listing Options
// ============================================================================

/// Optional filters for policy listing; `None` fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Restrict to a single policy type.
    pub policy_type: Option<PolicyType>,
    /// Restrict by enabled flag.
    pub enabled: Option<bool>,
}

/// Sortable listing fields for the CRUD surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    /// Order by evaluation priority.
    Priority,
    /// Order by display name.
    DisplayName,
    /// Order by record creation time.
    CreateTime,
}

/// Sort direction for an ordering clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// A single ordering clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Field to order by.
    pub field: OrderField,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// Options for one policy listing call.
///
/// An empty `order_by` selects the canonical catalog order
/// `(policy_type ASC, priority ASC, id ASC)` with restartable keyset page
/// tokens; custom orderings paginate by offset.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Listing filters.
    pub filter: CatalogFilter,
    /// Ordering clauses; empty selects the canonical catalog order.
    pub order_by: Vec<OrderBy>,
    /// Opaque page token from a previous call.
    pub page_token: Option<String>,
    /// Maximum records per page.
    pub page_size: usize,
}

/// One page of a policy listing.
#[derive(Debug, Clone, Default)]
pub struct PolicyPage {
    /// Policies on this page, in listing order.
    pub policies: Vec<Policy>,
    /// Token for the next page, absent on the final page.
    pub next_page_token: Option<String>,
}

// ============================================================================
// SECTION: Page Keys
// ============================================================================

/// Keyset pagination cursor over the canonical catalog order.
///
/// The encoded form is opaque to callers. Listing resumes strictly after the
/// encoded key, so concurrent inserts and deletes can neither duplicate nor
/// skip already-iterated identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKey {
    /// Policy type of the last record on the previous page.
    pub policy_type: PolicyType,
    /// Priority of the last record on the previous page.
    pub priority: i64,
    /// Identifier of the last record on the previous page.
    pub id: String,
}

impl PageKey {
    /// Returns the page key for the last policy of a page.
    #[must_use]
    pub fn for_policy(policy: &Policy) -> Self {
        Self {
            policy_type: policy.policy_type,
            priority: policy.priority,
            id: policy.id.as_str().to_string(),
        }
    }

    /// Returns true when a policy sorts strictly after this key.
    #[must_use]
    pub fn precedes(&self, policy: &Policy) -> bool {
        policy.sort_key() > (self.policy_type, self.priority, self.id.as_str())
    }
}

/// Page token decoding errors.
#[derive(Debug, Error)]
pub enum PageKeyError {
    /// Token is not a valid encoded page token.
    #[error("malformed page token")]
    Malformed,
}

/// Opaque pagination token.
///
/// The canonical catalog order paginates by keyset; custom orderings
/// paginate by offset. The encoded form is opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Keyset cursor over the canonical catalog order.
    Key(PageKey),
    /// Record offset for custom orderings.
    Offset(usize),
}

impl PageToken {
    /// Encodes the page token into its opaque string form.
    #[must_use]
    pub fn encode(&self) -> String {
        let raw = match self {
            Self::Key(key) => {
                format!("key\n{}\n{}\n{}", key.policy_type.as_str(), key.priority, key.id)
            }
            Self::Offset(offset) => format!("offset\n{offset}"),
        };
        BASE64.encode(raw)
    }

    /// Decodes an opaque token string.
    ///
    /// # Errors
    ///
    /// Returns [`PageKeyError::Malformed`] when the token cannot be decoded.
    pub fn decode(token: &str) -> Result<Self, PageKeyError> {
        let raw = BASE64.decode(token).map_err(|_| PageKeyError::Malformed)?;
        let raw = String::from_utf8(raw).map_err(|_| PageKeyError::Malformed)?;
        let mut parts = raw.splitn(2, '\n');
        let kind = parts.next().ok_or(PageKeyError::Malformed)?;
        let rest = parts.next().ok_or(PageKeyError::Malformed)?;
        match kind {
            "key" => {
                let mut fields = rest.splitn(3, '\n');
                let policy_type = fields
                    .next()
                    .and_then(PolicyType::parse)
                    .ok_or(PageKeyError::Malformed)?;
                let priority = fields
                    .next()
                    .and_then(|field| field.parse::<i64>().ok())
                    .ok_or(PageKeyError::Malformed)?;
                let id = fields.next().ok_or(PageKeyError::Malformed)?.to_string();
                Ok(Self::Key(PageKey {
                    policy_type,
                    priority,
                    id,
                }))
            }
            "offset" => {
                let offset = rest.parse::<usize>().map_err(|_| PageKeyError::Malformed)?;
                Ok(Self::Offset(offset))
            }
            _ => Err(PageKeyError::Malformed),
        }
    }
}

// ============================================================================
// SECTION: Catalog and Store
// ============================================================================

/// Policy catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Storage backend reported an error.
    #[error("policy catalog error: {0}")]
    Backend(String),
    /// Page token was not produced by this catalog.
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),
}

/// Read-side policy catalog consumed by the evaluator.
pub trait PolicyCatalog {
    /// Lists one page of policies under the given options.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when listing fails.
    fn list(&self, options: &ListOptions) -> Result<PolicyPage, CatalogError>;
}

/// Policy store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No policy with the given identifier exists.
    #[error("policy not found: {0}")]
    NotFound(PolicyId),
    /// A policy with the given identifier already exists.
    #[error("policy id already taken: {0}")]
    IdTaken(PolicyId),
    /// The `(display_name, policy_type)` pair is already taken.
    #[error("display_name and policy_type combination already taken")]
    DisplayNameTaken,
    /// The `(priority, policy_type)` pair is already taken.
    #[error("priority and policy_type combination already taken")]
    PriorityTaken,
    /// Storage backend reported an error.
    #[error("policy store error: {0}")]
    Backend(String),
}

/// Read/write policy store consumed by the CRUD surface.
pub trait PolicyStore: PolicyCatalog {
    /// Creates a new policy record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when creation fails or a uniqueness constraint
    /// is violated.
    fn create(&self, policy: Policy) -> Result<Policy, StoreError>;

    /// Returns the policy with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the policy does not exist.
    fn get(&self, id: &PolicyId) -> Result<Policy, StoreError>;

    /// Updates the mutable fields of an existing policy.
    ///
    /// `policy_type` and `create_time` are immutable and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the policy does not exist or a uniqueness
    /// constraint is violated.
    fn update(&self, policy: Policy) -> Result<Policy, StoreError>;

    /// Deletes the policy with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the policy does not exist.
    fn delete(&self, id: &PolicyId) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Rule Runtime
// ============================================================================

/// Rule runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Transport-level request failure.
    #[error("rule runtime request failed: {0}")]
    Request(String),
    /// Runtime answered with an unexpected status.
    #[error("rule runtime returned status {status}: {detail}")]
    Status {
        /// HTTP status code returned by the runtime.
        status: u16,
        /// Response detail when available.
        detail: String,
    },
    /// Runtime response could not be decoded.
    #[error("rule runtime response invalid: {0}")]
    Decode(String),
}

/// External rule runtime evaluating a single policy program.
pub trait RuleRuntime {
    /// Evaluates the named rule package against the given input document.
    ///
    /// Returns `None` when the runtime reports the decision as undefined
    /// (no rule matched); the policy is then skipped without state changes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the runtime cannot be reached or its
    /// response is invalid.
    fn evaluate(&self, package_name: &str, input: &Value)
    -> Result<Option<JsonObject>, RuntimeError>;
}

/// Rule module lifecycle consumed by the CRUD surface on write operations.
pub trait RulePublisher {
    /// Stores or replaces the rule module for a policy.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the module cannot be stored.
    fn put_policy(&self, id: &PolicyId, source: &str) -> Result<(), RuntimeError>;

    /// Deletes the rule module for a policy.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the module cannot be deleted.
    fn delete_policy(&self, id: &PolicyId) -> Result<(), RuntimeError>;
}
