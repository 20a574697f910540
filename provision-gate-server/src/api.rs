// provision-gate-server/src/api.rs
// ============================================================================
// Module: Public Policy API
// Description: CRUD router and handlers for the public listener.
// Purpose: Expose policy lifecycle operations over HTTP.
// Dependencies: axum, provision-gate-core, serde, tokio
// ============================================================================

//! ## Overview
//! The public API exposes policy create, get, list, update, and delete under
//! `/v1alpha1/policies`. Handlers are thin adapters: request bodies map onto
//! service inputs, service errors map onto problem documents, and the
//! blocking service runs on the blocking thread pool. Responses never carry
//! the rego source; the module lives in the rule runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use provision_gate_core::Policy;
use provision_gate_core::PolicyId;
use provision_gate_core::PolicyType;
use provision_gate_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

use crate::problem::Problem;
use crate::service::CreatePolicy;
use crate::service::PolicyService;
use crate::service::ServiceError;
use crate::service::UpdatePolicy;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Policy creation request body.
#[derive(Debug, Deserialize)]
pub struct CreatePolicyBody {
    /// Optional client-assigned identifier (AEP-122 shape).
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

/// Policy update request body (RFC 7396-style field merge).
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePolicyBody {
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

/// Policy representation returned by the API.
#[derive(Debug, Serialize)]
pub struct PolicyResource {
    /// Policy identifier.
    pub id: String,
    /// Policy partition.
    pub policy_type: PolicyType,
    /// Display name.
    pub display_name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Evaluation priority.
    pub priority: i64,
    /// Whether the policy is enabled.
    pub enabled: bool,
    /// Label selector.
    pub label_selector: BTreeMap<String, String>,
    /// Rule package name derived from the rego module.
    pub package_name: String,
    /// Record creation time (unix milliseconds).
    pub create_time: Timestamp,
    /// Record update time (unix milliseconds).
    pub update_time: Timestamp,
}

impl From<Policy> for PolicyResource {
    fn from(policy: Policy) -> Self {
        Self {
            id: policy.id.as_str().to_string(),
            policy_type: policy.policy_type,
            display_name: policy.display_name,
            description: policy.description,
            priority: policy.priority,
            enabled: policy.enabled,
            label_selector: policy.label_selector,
            package_name: policy.package_name,
            create_time: policy.create_time,
            update_time: policy.update_time,
        }
    }
}

/// Listing query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListPoliciesParams {
    /// Filter expression over `policy_type` and `enabled`.
    pub filter: Option<String>,
    /// Order-by parameter.
    pub order_by: Option<String>,
    /// Page size (default 50, max 1000).
    pub page_size: Option<i64>,
    /// Opaque page token.
    pub page_token: Option<String>,
}

/// Listing response body.
#[derive(Debug, Serialize)]
pub struct ListPoliciesResponse {
    /// Policies on this page.
    pub policies: Vec<PolicyResource>,
    /// Token for the next page, absent on the final page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the public API router.
pub fn router(service: Arc<PolicyService>) -> Router {
    Router::new()
        .route("/v1alpha1/policies", post(create_policy).get(list_policies))
        .route(
            "/v1alpha1/policies/{id}",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
        .with_state(service)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Creates a policy.
async fn create_policy(
    State(service): State<Arc<PolicyService>>,
    Json(body): Json<CreatePolicyBody>,
) -> Result<impl IntoResponse, Problem> {
    let request = CreatePolicy {
        id: body.id,
        display_name: body.display_name,
        policy_type: body.policy_type,
        description: body.description,
        priority: body.priority,
        enabled: body.enabled,
        label_selector: body.label_selector,
        rego_code: body.rego_code,
    };
    let policy = run_blocking(move || service.create(request)).await?;
    Ok((StatusCode::CREATED, Json(PolicyResource::from(policy))))
}

/// Returns a policy by identifier.
async fn get_policy(
    State(service): State<Arc<PolicyService>>,
    Path(id): Path<String>,
) -> Result<Json<PolicyResource>, Problem> {
    let policy = run_blocking(move || service.get(&PolicyId::new(id))).await?;
    Ok(Json(PolicyResource::from(policy)))
}

/// Lists policies.
async fn list_policies(
    State(service): State<Arc<PolicyService>>,
    Query(params): Query<ListPoliciesParams>,
) -> Result<Json<ListPoliciesResponse>, Problem> {
    let page = run_blocking(move || {
        service.list(
            params.filter.as_deref(),
            params.order_by.as_deref(),
            params.page_size,
            params.page_token,
        )
    })
    .await?;
    Ok(Json(ListPoliciesResponse {
        policies: page.policies.into_iter().map(PolicyResource::from).collect(),
        next_page_token: page.next_page_token,
    }))
}

/// Applies a partial update to a policy.
async fn update_policy(
    State(service): State<Arc<PolicyService>>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePolicyBody>,
) -> Result<Json<PolicyResource>, Problem> {
    let patch = UpdatePolicy {
        display_name: body.display_name,
        description: body.description,
        priority: body.priority,
        enabled: body.enabled,
        label_selector: body.label_selector,
        rego_code: body.rego_code,
    };
    let policy = run_blocking(move || service.update(&PolicyId::new(id), patch)).await?;
    Ok(Json(PolicyResource::from(policy)))
}

/// Deletes a policy.
async fn delete_policy(
    State(service): State<Arc<PolicyService>>,
    Path(id): Path<String>,
) -> Result<StatusCode, Problem> {
    run_blocking(move || service.delete(&PolicyId::new(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Runs a blocking service call on the blocking thread pool.
async fn run_blocking<T, F>(operation: F) -> Result<T, Problem>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|_| Problem::internal("Internal server error", None))?
        .map_err(problem_from_service_error)
}

/// Maps a service error onto its problem document.
fn problem_from_service_error(error: ServiceError) -> Problem {
    match error {
        ServiceError::InvalidArgument {
            message,
            detail,
        } => Problem::bad_request(message, Some(detail)),
        ServiceError::NotFound {
            message,
            detail,
        } => Problem::not_found(message, Some(detail)),
        ServiceError::AlreadyExists {
            message,
            detail,
        } => Problem::already_exists(message, Some(detail)),
        ServiceError::Internal {
            message,
            detail,
        } => {
            tracing::error!(detail = %detail, "policy service failure");
            Problem::internal(message, Some(detail))
        }
    }
}
