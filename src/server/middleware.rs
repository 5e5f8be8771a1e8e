//! Bearer-token guard for protected routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::auth::bearer_token;

use super::{ApiError, AppState};

/// Reject the request unless it carries a verified token
///
/// On success the caller's `Identity` is available to handlers as an
/// extension.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = bearer_token(header)?.to_string();

    let identity = state.verifier.verify(&token).await.map_err(|e| {
        debug!(error = %e, path = %request.uri().path(), "Rejected token");
        e
    })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
