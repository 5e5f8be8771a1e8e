//! Mapping of failures to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::core::PipelineError;
use crate::domain::GateFailure;

/// Every error a handler can return
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Gate(GateFailure),
    Pipeline(PipelineError),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<GateFailure> for ApiError {
    fn from(f: GateFailure) -> Self {
        Self::Gate(f)
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(AuthError::Unauthenticated) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing bearer token" })),
            )
                .into_response(),
            Self::Auth(AuthError::Unauthorized(detail)) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid token", "detail": detail })),
            )
                .into_response(),
            Self::Gate(failure) => (StatusCode::PRECONDITION_FAILED, Json(failure)).into_response(),
            Self::Pipeline(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
        }
    }
}
