//! WASM sandbox backend.
//!
//! Posts `{code, language, timeout}` to the WASM runner service and reads
//! back its output. The runner is an external service; only the HTTP
//! contract lives here.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::Runtime;

use super::{BackendError, BackendOutput, ExecutionBackend, ExecutionRequest};

/// Language assumed when the specification does not name one
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Response from the WASM runner
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerResponse {
    #[serde(default, alias = "detail")]
    output: Option<String>,

    #[serde(default, alias = "executionTime")]
    execution_time_ms: Option<u64>,

    #[serde(default)]
    exit_code: Option<i32>,
}

/// HTTP client for the WASM runner
pub struct WasmBackend {
    /// Runner endpoint
    url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl WasmBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExecutionBackend for WasmBackend {
    fn runtime(&self) -> Runtime {
        Runtime::Wasm
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendOutput, BackendError> {
        let started = Instant::now();

        let response = self
            .client
            .post(&self.url)
            .timeout(request.timeout)
            .json(&serde_json::json!({
                "code": request.task.instruction,
                "language": request.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
                "timeout": request.timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                runtime: Runtime::Wasm,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                runtime: Runtime::Wasm,
                status: status.as_u16(),
            });
        }

        let body: RunnerResponse = response.json().await.map_err(|e| BackendError::Protocol {
            runtime: Runtime::Wasm,
            message: e.to_string(),
        })?;

        Ok(BackendOutput {
            detail: body.output.unwrap_or_else(|| {
                format!("Executed {} -> {}", request.task.id, request.task.instruction)
            }),
            runtime: Runtime::Wasm,
            execution_time_ms: body
                .execution_time_ms
                .unwrap_or_else(|| started.elapsed().as_millis() as u64),
            exit_code: body.exit_code,
        })
    }
}
