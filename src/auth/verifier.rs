//! JWT verification against the identity provider's key set.
//!
//! The key set is fetched on first use and cached for the life of the
//! verifier. Concurrent first verifications share one fetch; a failed
//! fetch is not cached. Rejected tokens never touch the cache.

use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::IdentityConfig;

use super::{AuthError, Identity};

/// Subject reported when a valid token carries no `sub` claim
const UNKNOWN_SUBJECT: &str = "unknown";

/// Deadline for fetching the key set
pub const KEY_SET_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

/// Verifies bearer tokens for one issuer and audience
pub struct TokenVerifier {
    issuer: String,
    audience: String,
    jwks_url: String,
    client: reqwest::Client,
    keys: OnceCell<JwkSet>,
}

impl TokenVerifier {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            jwks_url: config.jwks_url.clone(),
            client: http_client(KEY_SET_FETCH_TIMEOUT),
            keys: OnceCell::new(),
        }
    }

    /// Replace the key set fetch deadline
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Verifier with a preloaded key set; no fetch ever happens
    pub fn with_key_set(config: &IdentityConfig, keys: JwkSet) -> Self {
        Self {
            keys: OnceCell::new_with(Some(keys)),
            ..Self::new(config)
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn key_set(&self) -> Result<&JwkSet, AuthError> {
        self.keys
            .get_or_try_init(|| async {
                info!(url = %self.jwks_url, "Fetching identity provider key set");
                let response = self
                    .client
                    .get(&self.jwks_url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| AuthError::Unauthorized(format!("key set unavailable: {e}")))?;

                response
                    .json::<JwkSet>()
                    .await
                    .map_err(|e| AuthError::Unauthorized(format!("key set unreadable: {e}")))
            })
            .await
    }

    /// Verify a raw token and return the identity it carries
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Unauthorized(e.to_string()))?;
        let keys = self.key_set().await?;

        let jwk = select_key(keys, header.kid.as_deref())?;
        if let Some(key_alg) = &jwk.common.key_algorithm {
            if signing_algorithm(key_alg) != Some(header.alg) {
                return Err(AuthError::Unauthorized(format!(
                    "token algorithm {:?} does not match key",
                    header.alg
                )));
            }
        }

        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        let subject = data
            .claims
            .sub
            .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string());
        debug!(subject = %subject, "Token verified");
        Ok(Identity { subject })
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Signing algorithm a key is published for; `None` for encryption-only keys
fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Key matching `kid`, or the first key when the token names none
fn select_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, AuthError> {
    match kid {
        Some(kid) => keys
            .find(kid)
            .ok_or_else(|| AuthError::Unauthorized(format!("no key with id '{kid}'"))),
        None => keys
            .keys
            .first()
            .ok_or_else(|| AuthError::Unauthorized("key set is empty".to_string())),
    }
}
