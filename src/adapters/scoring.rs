//! Gate scoring adapters.
//!
//! `HttpGateScorer` posts `{stage, content}` to the scoring service and
//! compares the returned score to its threshold. `SkippingScorer` is the
//! explicit degraded mode used when no service is configured: every gate
//! passes and the verdict says why.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{GateScorer, GateVerdict, ScoringError};

/// Reason attached to verdicts produced without a scoring service
pub const MISSING_CONFIG_REASON: &str = "missing-api-key";

/// Per-request deadline on the scoring client
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body of the scoring service
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
    threshold: f64,
}

/// HTTP gate scorer
pub struct HttpGateScorer {
    /// Scoring endpoint
    url: String,
    /// Bearer key for the endpoint
    api_key: String,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpGateScorer {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GateScorer for HttpGateScorer {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, stage: &str, content: &str) -> Result<GateVerdict, ScoringError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "stage": stage,
                "content": content,
            }))
            .send()
            .await
            .map_err(|e| ScoringError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(stage, status = status.as_u16(), "Scoring service rejected stage");
            return Ok(GateVerdict::rejected(status.as_u16()));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::InvalidResponse(e.to_string()))?;

        Ok(GateVerdict::scored(body.score, body.threshold))
    }
}

/// Degraded-mode scorer: passes every gate without evaluation
#[derive(Debug, Clone)]
pub struct SkippingScorer {
    reason: String,
}

impl Default for SkippingScorer {
    fn default() -> Self {
        Self::new(MISSING_CONFIG_REASON)
    }
}

impl SkippingScorer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl GateScorer for SkippingScorer {
    fn name(&self) -> &str {
        "skipping"
    }

    async fn score(&self, _stage: &str, _content: &str) -> Result<GateVerdict, ScoringError> {
        Ok(GateVerdict::skipped(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::VerdictSource;

    #[tokio::test]
    async fn test_skipping_scorer_passes() {
        let scorer = SkippingScorer::default();
        let verdict = scorer.score("plan", "{}").await.unwrap();

        assert!(verdict.passed);
        assert_eq!(
            verdict.source,
            VerdictSource::Skipped {
                reason: MISSING_CONFIG_REASON.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let scorer = HttpGateScorer::new("http://127.0.0.1:9/score", "key");
        let result = scorer.score("plan", "{}").await;
        assert!(matches!(result, Err(ScoringError::Transport(_))));
    }
}
