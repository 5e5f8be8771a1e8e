//! Request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::core::PipelineError;
use crate::domain::{PipelineOutcome, PipelineResult};

use super::{ApiError, AppState};

/// Body of `POST /run`
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub spec: Value,
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ping(Extension(identity): Extension<Identity>) -> Json<Value> {
    Json(json!({ "ok": true, "user": identity.subject }))
}

pub async fn run(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<PipelineResult>, ApiError> {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = PipelineError::MalformedRequest(rejection.body_text());
            state.pipeline.report_error(&err).await;
            return Err(err.into());
        }
    };

    match state.pipeline.run_value(request.spec).await? {
        PipelineOutcome::Complete(result) => Ok(Json(result)),
        PipelineOutcome::GateFailed(failure) => Err(failure.into()),
    }
}
