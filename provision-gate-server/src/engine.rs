// provision-gate-server/src/engine.rs
// ============================================================================
// Module: Engine API
// Description: Evaluation endpoint for the engine-private listener.
// Purpose: Bridge HTTP evaluation requests into the synchronous core fold.
// Dependencies: axum, provision-gate-core, serde, tokio, tracing
// ============================================================================

//! ## Overview
//! The engine listener exposes a single operation,
//! `POST /policies:evaluateRequest`. The handler derives the request labels,
//! runs the evaluator on the blocking thread pool, and maps the outcome onto
//! the wire statuses: 200 for approved or modified instances, 406 for
//! rejections, 409 for policy conflicts, and 500 for backend faults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use provision_gate_core::EvaluationError;
use provision_gate_core::EvaluationRequest;
use provision_gate_core::EvaluationStatus;
use provision_gate_core::Evaluator;
use provision_gate_core::JsonObject;
use provision_gate_core::SharedPolicyStore;
use provision_gate_core::SharedRuleRuntime;
use provision_gate_core::extract_request_labels;
use serde::Deserialize;
use serde::Serialize;

use crate::problem::Problem;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Evaluator wired to the shared store and rule runtime.
pub type EngineEvaluator = Evaluator<SharedPolicyStore, SharedRuleRuntime>;

/// Service instance envelope used on both request and response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInstanceBody {
    /// Open service-instance spec mapping.
    pub spec: JsonObject,
}

/// Evaluation request body.
#[derive(Debug, Deserialize)]
pub struct EvaluateRequestBody {
    /// Service instance to evaluate.
    pub service_instance: ServiceInstanceBody,
}

/// Evaluation response body.
#[derive(Debug, Serialize)]
pub struct EvaluateResponseBody {
    /// Approval classification.
    pub status: EvaluationStatus,
    /// The evaluated service instance.
    pub evaluated_service_instance: ServiceInstanceBody,
    /// Selected provider, empty when no policy picked one.
    pub selected_provider: String,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the engine API router.
pub fn router(evaluator: Arc<EngineEvaluator>) -> Router {
    Router::new().route("/policies:evaluateRequest", post(evaluate_request)).with_state(evaluator)
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Evaluates a service-instance request against all applicable policies.
async fn evaluate_request(
    State(evaluator): State<Arc<EngineEvaluator>>,
    Json(body): Json<EvaluateRequestBody>,
) -> Result<Json<EvaluateResponseBody>, Problem> {
    let request_labels = extract_request_labels(&body.service_instance.spec)
        .map_err(|error| Problem::bad_request("Invalid service instance", Some(error.to_string())))?;
    let request = EvaluationRequest {
        service_instance: body.service_instance.spec,
        request_labels,
    };

    let outcome = tokio::task::spawn_blocking(move || evaluator.evaluate(&request))
        .await
        .map_err(|_| Problem::internal("Internal server error", None))?
        .map_err(problem_from_evaluation_error)?;

    tracing::info!(
        status = ?outcome.status,
        selected_provider = %outcome.selected_provider,
        "evaluation completed"
    );

    Ok(Json(EvaluateResponseBody {
        status: outcome.status,
        evaluated_service_instance: ServiceInstanceBody {
            spec: outcome.evaluated_service_instance,
        },
        selected_provider: outcome.selected_provider,
    }))
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Maps an evaluation error onto its problem document.
fn problem_from_evaluation_error(error: EvaluationError) -> Problem {
    match &error {
        EvaluationError::Rejected {
            ..
        } => Problem::rejected("Request rejected by policy", Some(error.to_string())),
        EvaluationError::Conflict(_) => {
            Problem::policy_conflict("Policy conflict", Some(error.to_string()))
        }
        EvaluationError::Catalog(_) | EvaluationError::Runtime(_) => {
            tracing::error!(error = %error, "evaluation failed");
            Problem::internal("Internal server error", Some(error.to_string()))
        }
    }
}
