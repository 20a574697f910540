// provision-gate-core/src/runtime/catalog.rs
// ============================================================================
// Module: Provision Gate In-Memory Catalog
// Description: In-memory policy store for tests and examples.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of [`PolicyStore`]
//! for tests and local demos, plus shared trait-object wrappers used to wire
//! concrete backends into the evaluator. Ordering and pagination semantics
//! match the durable store: canonical catalog order with keyset tokens,
//! custom orderings with offset tokens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::JsonObject;
use crate::core::Policy;
use crate::core::PolicyId;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogFilter;
use crate::interfaces::ListOptions;
use crate::interfaces::OrderBy;
use crate::interfaces::OrderDirection;
use crate::interfaces::OrderField;
use crate::interfaces::PageKey;
use crate::interfaces::PageToken;
use crate::interfaces::PolicyCatalog;
use crate::interfaces::PolicyPage;
use crate::interfaces::PolicyStore;
use crate::interfaces::RuleRuntime;
use crate::interfaces::RuntimeError;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory policy store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPolicyStore {
    /// Policy map keyed by identifier, protected by a mutex.
    policies: Arc<Mutex<BTreeMap<String, Policy>>>,
}

impl InMemoryPolicyStore {
    /// Creates a new in-memory policy store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyCatalog for InMemoryPolicyStore {
    fn list(&self, options: &ListOptions) -> Result<PolicyPage, CatalogError> {
        let guard = self
            .policies
            .lock()
            .map_err(|_| CatalogError::Backend("policy store mutex poisoned".to_string()))?;
        let matched: Vec<Policy> = guard
            .values()
            .filter(|policy| filter_matches(&options.filter, policy))
            .cloned()
            .collect();
        drop(guard);

        if options.order_by.is_empty() {
            list_canonical(matched, options)
        } else {
            list_custom(matched, options)
        }
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn create(&self, policy: Policy) -> Result<Policy, StoreError> {
        let mut guard = self
            .policies
            .lock()
            .map_err(|_| StoreError::Backend("policy store mutex poisoned".to_string()))?;
        if guard.contains_key(policy.id.as_str()) {
            return Err(StoreError::IdTaken(policy.id));
        }
        check_uniqueness(guard.values(), &policy, None)?;
        guard.insert(policy.id.as_str().to_string(), policy.clone());
        Ok(policy)
    }

    fn get(&self, id: &PolicyId) -> Result<Policy, StoreError> {
        let guard = self
            .policies
            .lock()
            .map_err(|_| StoreError::Backend("policy store mutex poisoned".to_string()))?;
        guard.get(id.as_str()).cloned().ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn update(&self, policy: Policy) -> Result<Policy, StoreError> {
        let mut guard = self
            .policies
            .lock()
            .map_err(|_| StoreError::Backend("policy store mutex poisoned".to_string()))?;
        let Some(existing) = guard.get(policy.id.as_str()).cloned() else {
            return Err(StoreError::NotFound(policy.id));
        };
        check_uniqueness(guard.values(), &policy, Some(&existing.id))?;

        let mut updated = policy;
        updated.policy_type = existing.policy_type;
        updated.create_time = existing.create_time;
        guard.insert(updated.id.as_str().to_string(), updated.clone());
        Ok(updated)
    }

    fn delete(&self, id: &PolicyId) -> Result<(), StoreError> {
        let mut guard = self
            .policies
            .lock()
            .map_err(|_| StoreError::Backend("policy store mutex poisoned".to_string()))?;
        if guard.remove(id.as_str()).is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Listing Helpers
// ============================================================================

/// Returns true when a policy passes the listing filter.
fn filter_matches(filter: &CatalogFilter, policy: &Policy) -> bool {
    if let Some(policy_type) = filter.policy_type
        && policy.policy_type != policy_type
    {
        return false;
    }
    if let Some(enabled) = filter.enabled
        && policy.enabled != enabled
    {
        return false;
    }
    true
}

/// Lists under the canonical catalog order with keyset pagination.
fn list_canonical(
    mut matched: Vec<Policy>,
    options: &ListOptions,
) -> Result<PolicyPage, CatalogError> {
    matched.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let start_key = match options.page_token.as_deref() {
        None => None,
        Some(token) => match PageToken::decode(token) {
            Ok(PageToken::Key(key)) => Some(key),
            Ok(PageToken::Offset(_)) | Err(_) => {
                return Err(CatalogError::InvalidPageToken(token.to_string()));
            }
        },
    };

    let mut remaining: Vec<Policy> = matched
        .into_iter()
        .filter(|policy| start_key.as_ref().is_none_or(|key| key.precedes(policy)))
        .collect();

    let page_size = options.page_size.max(1);
    let next_page_token = if remaining.len() > page_size {
        remaining.truncate(page_size);
        remaining.last().map(|policy| PageToken::Key(PageKey::for_policy(policy)).encode())
    } else {
        None
    };

    Ok(PolicyPage {
        policies: remaining,
        next_page_token,
    })
}

/// Lists under a custom ordering with offset pagination.
fn list_custom(mut matched: Vec<Policy>, options: &ListOptions) -> Result<PolicyPage, CatalogError> {
    matched.sort_by(|a, b| compare_policies(a, b, &options.order_by));

    let offset = match options.page_token.as_deref() {
        None => 0,
        Some(token) => match PageToken::decode(token) {
            Ok(PageToken::Offset(offset)) => offset,
            Ok(PageToken::Key(_)) | Err(_) => {
                return Err(CatalogError::InvalidPageToken(token.to_string()));
            }
        },
    };

    let page_size = options.page_size.max(1);
    let mut page: Vec<Policy> = matched.into_iter().skip(offset).take(page_size + 1).collect();
    let next_page_token = if page.len() > page_size {
        page.truncate(page_size);
        Some(PageToken::Offset(offset + page_size).encode())
    } else {
        None
    };

    Ok(PolicyPage {
        policies: page,
        next_page_token,
    })
}

/// Compares two policies under the given ordering clauses, id tiebreak last.
fn compare_policies(a: &Policy, b: &Policy, order_by: &[OrderBy]) -> Ordering {
    for clause in order_by {
        let ordering = match clause.field {
            OrderField::Priority => a.priority.cmp(&b.priority),
            OrderField::DisplayName => a.display_name.cmp(&b.display_name),
            OrderField::CreateTime => a.create_time.cmp(&b.create_time),
        };
        let ordering = match clause.direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.as_str().cmp(b.id.as_str())
}

/// Checks the uniqueness invariants against existing records.
fn check_uniqueness<'a>(
    existing: impl Iterator<Item = &'a Policy>,
    candidate: &Policy,
    exclude: Option<&PolicyId>,
) -> Result<(), StoreError> {
    for policy in existing {
        if exclude == Some(&policy.id) {
            continue;
        }
        if policy.policy_type == candidate.policy_type {
            if policy.display_name == candidate.display_name {
                return Err(StoreError::DisplayNameTaken);
            }
            if policy.priority == candidate.priority {
                return Err(StoreError::PriorityTaken);
            }
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Shared Wrappers
// ============================================================================

/// Shared policy store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedPolicyStore {
    /// Inner store implementation.
    inner: Arc<dyn PolicyStore + Send + Sync>,
}

impl SharedPolicyStore {
    /// Wraps a policy store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl PolicyStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn PolicyStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl PolicyCatalog for SharedPolicyStore {
    fn list(&self, options: &ListOptions) -> Result<PolicyPage, CatalogError> {
        self.inner.list(options)
    }
}

impl PolicyStore for SharedPolicyStore {
    fn create(&self, policy: Policy) -> Result<Policy, StoreError> {
        self.inner.create(policy)
    }

    fn get(&self, id: &PolicyId) -> Result<Policy, StoreError> {
        self.inner.get(id)
    }

    fn update(&self, policy: Policy) -> Result<Policy, StoreError> {
        self.inner.update(policy)
    }

    fn delete(&self, id: &PolicyId) -> Result<(), StoreError> {
        self.inner.delete(id)
    }
}

/// Shared rule runtime backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedRuleRuntime {
    /// Inner runtime implementation.
    inner: Arc<dyn RuleRuntime + Send + Sync>,
}

impl SharedRuleRuntime {
    /// Wraps a rule runtime in a shared, clonable wrapper.
    #[must_use]
    pub fn from_runtime(runtime: impl RuleRuntime + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(runtime),
        }
    }

    /// Wraps an existing shared runtime.
    #[must_use]
    pub const fn new(runtime: Arc<dyn RuleRuntime + Send + Sync>) -> Self {
        Self {
            inner: runtime,
        }
    }
}

impl RuleRuntime for SharedRuleRuntime {
    fn evaluate(
        &self,
        package_name: &str,
        input: &Value,
    ) -> Result<Option<JsonObject>, RuntimeError> {
        self.inner.evaluate(package_name, input)
    }
}
