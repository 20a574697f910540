// provision-gate-server/src/problem.rs
// ============================================================================
// Module: Problem Responses
// Description: RFC 7807 problem documents for API errors.
// Purpose: Provide one uniform error envelope across both listeners.
// Dependencies: axum, serde
// ============================================================================

//! ## Overview
//! Every error either listener returns is an `application/problem+json`
//! document with `type`, `title`, `status`, and an optional `detail`. The
//! `type` member carries a stable error token rather than a dereferenceable
//! URI.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;

// ============================================================================
// SECTION: Problem Document
// ============================================================================

/// Media type for problem responses.
const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// RFC 7807 problem document.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    /// Stable error token.
    #[serde(rename = "type")]
    pub error_type: &'static str,
    /// Short human-readable title.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Problem {
    /// Builds a problem document.
    fn new(
        status: StatusCode,
        error_type: &'static str,
        title: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            error_type,
            title: title.into(),
            status: status.as_u16(),
            detail,
        }
    }

    /// 400 with an `INVALID_ARGUMENT` token.
    #[must_use]
    pub fn bad_request(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", title, detail)
    }

    /// 404 with a `NOT_FOUND` token.
    #[must_use]
    pub fn not_found(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", title, detail)
    }

    /// 409 with an `ALREADY_EXISTS` token.
    #[must_use]
    pub fn already_exists(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "ALREADY_EXISTS", title, detail)
    }

    /// 406 with a `REJECTED` token for rejected evaluations.
    #[must_use]
    pub fn rejected(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE, "REJECTED", title, detail)
    }

    /// 409 with a `POLICY_CONFLICT` token for conflicting evaluations.
    #[must_use]
    pub fn policy_conflict(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "POLICY_CONFLICT", title, detail)
    }

    /// 500 with an `INTERNAL` token.
    #[must_use]
    pub fn internal(title: impl Into<String>, detail: Option<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", title, detail)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, [(CONTENT_TYPE, PROBLEM_CONTENT_TYPE)], Json(self)).into_response()
    }
}
