// provision-gate-core/src/runtime/evaluator.rs
// ============================================================================
// Module: Provision Gate Evaluator
// Description: Sequential policy fold over a service-instance document.
// Purpose: Compose all applicable policies into one deterministic outcome.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The evaluator drives the policy fold: for each enabled policy in
//! precedence order it builds the rule input, invokes the external rule
//! runtime, classifies the decision, merges constraints, validates and
//! applies the patch, and threads the selected provider. Constraints added
//! by a policy bind subsequent policies, never the policy that introduced
//! them. The fold is order-dependent and runs strictly sequentially within
//! one request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::JsonObject;
use crate::core::Policy;
use crate::core::PolicyDecision;
use crate::core::PolicyId;
use crate::core::matches_label_selector;
use crate::core::merge_patch;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogFilter;
use crate::interfaces::ListOptions;
use crate::interfaces::PolicyCatalog;
use crate::interfaces::RuleRuntime;
use crate::interfaces::RuntimeError;
use crate::runtime::constraints::ConstraintContext;
use crate::runtime::constraints::ConstraintViolation;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Catalog page size used while folding over the policy catalog.
pub const CATALOG_PAGE_SIZE: usize = 1_000;

// ============================================================================
// SECTION: Request and Outcome
// ============================================================================

/// One policy evaluation request.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// Service instance spec submitted by the caller.
    pub service_instance: JsonObject,
    /// Request labels derived from `service_type` and `metadata.labels`.
    pub request_labels: BTreeMap<String, String>,
}

/// Success classification of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    /// The evaluated instance is structurally equal to the input.
    #[serde(rename = "APPROVED")]
    Approved,
    /// At least one policy patch changed the instance.
    #[serde(rename = "MODIFIED")]
    Modified,
}

/// Successful evaluation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// The service instance after all patches were applied.
    pub evaluated_service_instance: JsonObject,
    /// Provider selected by the latest policy that set one, empty when none.
    pub selected_provider: String,
    /// Approval classification.
    pub status: EvaluationStatus,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Conflict between a policy and the accumulated constraint context.
#[derive(Debug, Error)]
#[error("policy '{policy_id}' conflicts with accumulated constraints: {reason}")]
pub struct PolicyConflict {
    /// Policy whose decision caused the conflict.
    pub policy_id: PolicyId,
    /// Field path involved, when the conflict concerns a field constraint.
    pub field_path: Option<String>,
    /// Policy that established the binding constraint.
    pub set_by: Option<PolicyId>,
    /// Human-readable detail naming the binding policy.
    pub reason: String,
}

/// Evaluation errors; all are fatal to the current request.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// A policy rejected the request outright.
    #[error("policy '{policy_id}' rejected the request: {reason}")]
    Rejected {
        /// Rejecting policy.
        policy_id: PolicyId,
        /// Rejection reason reported by the policy.
        reason: String,
    },
    /// A policy conflicted with the accumulated constraints.
    #[error(transparent)]
    Conflict(#[from] PolicyConflict),
    /// Policy catalog failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Rule runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Policy evaluation engine folding the catalog over a service instance.
pub struct Evaluator<C, R> {
    /// Policy catalog implementation.
    catalog: C,
    /// External rule runtime implementation.
    runtime: R,
    /// Catalog page size for the fold.
    page_size: usize,
}

impl<C, R> Evaluator<C, R>
where
    C: PolicyCatalog,
    R: RuleRuntime,
{
    /// Creates a new evaluator over a catalog and rule runtime.
    pub fn new(catalog: C, runtime: R) -> Self {
        Self {
            catalog,
            runtime,
            page_size: CATALOG_PAGE_SIZE,
        }
    }

    /// Overrides the catalog page size (primarily for tests).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Evaluates a service-instance request against all applicable policies.
    ///
    /// The catalog is consumed exactly once, in precedence order
    /// `(policy_type ASC, priority ASC, id ASC)`, restricted to enabled
    /// policies. Policies whose label selector is not a subset of the
    /// request labels are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] on rejection, conflict, or backend
    /// failure; no partial state is returned.
    pub fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        let mut current_spec = request.service_instance.clone();
        let mut selected_provider = String::new();
        let mut ctx = ConstraintContext::new();

        let mut page_token: Option<String> = None;
        loop {
            let options = ListOptions {
                filter: CatalogFilter {
                    policy_type: None,
                    enabled: Some(true),
                },
                order_by: Vec::new(),
                page_token: page_token.take(),
                page_size: self.page_size,
            };
            let page = self.catalog.list(&options)?;

            for policy in &page.policies {
                if !matches_label_selector(&policy.label_selector, &request.request_labels) {
                    continue;
                }
                self.evaluate_policy(
                    policy,
                    &mut current_spec,
                    &mut selected_provider,
                    &mut ctx,
                )?;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let status = if current_spec == request.service_instance {
            EvaluationStatus::Approved
        } else {
            EvaluationStatus::Modified
        };

        Ok(EvaluationOutcome {
            evaluated_service_instance: current_spec,
            selected_provider,
            status,
        })
    }

    /// Applies one policy decision to the evolving evaluation state.
    fn evaluate_policy(
        &self,
        policy: &Policy,
        current_spec: &mut JsonObject,
        selected_provider: &mut String,
        ctx: &mut ConstraintContext,
    ) -> Result<(), EvaluationError> {
        let input = build_rule_input(current_spec, selected_provider, ctx);
        let Some(result) = self.runtime.evaluate(&policy.package_name, &input)? else {
            // Undefined decision: no rule matched, skip without state changes.
            return Ok(());
        };
        let decision = PolicyDecision::parse(&result);

        if decision.rejected {
            return Err(EvaluationError::Rejected {
                policy_id: policy.id.clone(),
                reason: decision.rejection_reason,
            });
        }

        if let Some(constraints) = &decision.constraints {
            ctx.merge_constraints(constraints, &policy.id).map_err(|conflict| PolicyConflict {
                policy_id: policy.id.clone(),
                field_path: Some(conflict.field_path.clone()),
                set_by: Some(conflict.set_by.clone()),
                reason: conflict.reason,
            })?;
        }

        if let Some(provider_constraints) = &decision.service_provider_constraints {
            ctx.merge_provider_constraints(
                &provider_constraints.allow_list,
                &provider_constraints.patterns,
                &policy.id,
            )
            .map_err(|conflict| PolicyConflict {
                policy_id: policy.id.clone(),
                field_path: None,
                set_by: Some(conflict.set_by.clone()),
                reason: conflict.reason,
            })?;
        }

        if let Some(patch) = &decision.patch {
            let violations = ctx.validate_patch(patch);
            if !violations.is_empty() {
                return Err(violations_conflict(&policy.id, violations).into());
            }
            *current_spec = merge_patch(current_spec, patch);
        }

        if !decision.selected_provider.is_empty() {
            ctx.validate_service_provider(&decision.selected_provider).map_err(|conflict| {
                PolicyConflict {
                    policy_id: policy.id.clone(),
                    field_path: None,
                    set_by: Some(conflict.set_by.clone()),
                    reason: conflict.reason,
                }
            })?;
            *selected_provider = decision.selected_provider;
        }

        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Assembles the rule input document for one policy invocation.
///
/// Policies observe the evolving spec, the currently selected provider, and
/// the constraint projections accumulated by higher-priority policies.
fn build_rule_input(
    current_spec: &JsonObject,
    selected_provider: &str,
    ctx: &ConstraintContext,
) -> Value {
    let mut input = JsonObject::new();
    input.insert("spec".to_string(), Value::Object(current_spec.clone()));
    input.insert("provider".to_string(), Value::String(selected_provider.to_string()));
    if let Some(constraints) = ctx.constraints_map() {
        input.insert("constraints".to_string(), constraints);
    }
    if let Some(provider_constraints) = ctx.provider_constraints_map() {
        input.insert("service_provider_constraints".to_string(), provider_constraints);
    }
    Value::Object(input)
}

/// Folds patch violations into a single conflict naming the binding policies.
fn violations_conflict(
    policy_id: &PolicyId,
    violations: Vec<ConstraintViolation>,
) -> PolicyConflict {
    let details = violations
        .iter()
        .map(|violation| {
            format!(
                "{}: {} (set by policy '{}')",
                violation.field_path, violation.reason, violation.set_by
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    let first = violations.into_iter().next();
    PolicyConflict {
        policy_id: policy_id.clone(),
        field_path: first.as_ref().map(|violation| violation.field_path.clone()),
        set_by: first.map(|violation| violation.set_by),
        reason: format!("patch violates accumulated constraints: {details}"),
    }
}
