//! Bearer-token authentication.
//!
//! Tokens are JWTs signed by the identity provider. `TokenVerifier` checks
//! signature, issuer, audience and expiry against the provider's key set.

pub mod verifier;

use thiserror::Error;

pub use verifier::TokenVerifier;

/// Authentication failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    /// No usable `Authorization: Bearer` header
    #[error("missing bearer token")]
    Unauthenticated,

    /// A token was presented but did not verify
    #[error("invalid token: {0}")]
    Unauthorized(String),
}

/// The caller a verified token identifies
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub subject: String,
}

/// Extract the token from an `Authorization` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Unauthenticated)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Unauthenticated)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }
    Ok(token)
}
