//! Adapter interfaces for external systems.
//!
//! Adapters give the pipeline a uniform interface to the collaborators it
//! does not own: the execution backends and the gate scoring service.

pub mod container;
pub mod scoring;
pub mod wasm;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CodeTask, Runtime};

pub use container::ContainerBackend;
pub use scoring::{HttpGateScorer, SkippingScorer};
pub use wasm::WasmBackend;

/// A unit of work handed to an execution backend
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The code task to run
    pub task: CodeTask,

    /// Language hint from the specification
    pub language: Option<String>,

    /// Time budget for this task
    pub timeout: Duration,
}

/// Output from a backend execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendOutput {
    /// Free-text detail
    pub detail: String,

    /// Runtime that actually ran the task
    pub runtime: Runtime,

    /// Execution time reported by the backend
    pub execution_time_ms: u64,

    /// Process exit code (if available)
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Backend errors; all of them abort the run as pipeline errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{runtime} backend request failed: {message}")]
    Transport { runtime: Runtime, message: String },

    #[error("{runtime} execution failed: HTTP {status}")]
    Status { runtime: Runtime, status: u16 },

    #[error("{runtime} backend returned an invalid response: {message}")]
    Protocol { runtime: Runtime, message: String },
}

/// Trait for execution backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Runtime this backend implements
    fn runtime(&self) -> Runtime;

    /// Execute one task
    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendOutput, BackendError>;
}

/// The pair of backends a pipeline dispatches to
#[derive(Clone)]
pub struct Backends {
    pub wasm: Arc<dyn ExecutionBackend>,
    pub container: Arc<dyn ExecutionBackend>,
}

impl Backends {
    pub fn new(wasm: Arc<dyn ExecutionBackend>, container: Arc<dyn ExecutionBackend>) -> Self {
        Self { wasm, container }
    }

    /// Backend for a selected runtime
    pub fn for_runtime(&self, runtime: Runtime) -> &Arc<dyn ExecutionBackend> {
        match runtime {
            Runtime::Wasm => &self.wasm,
            Runtime::Container => &self.container,
        }
    }
}

/// Where a gate verdict came from
#[derive(Debug, Clone, PartialEq)]
pub enum VerdictSource {
    /// The scoring service returned a score
    Scored,

    /// Scoring is not configured; the gate passed without evaluation
    Skipped { reason: String },

    /// The scoring service answered with a non-success status
    Rejected { status: u16 },
}

/// Result of evaluating one gate
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub passed: bool,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
    pub source: VerdictSource,
}

impl GateVerdict {
    /// Verdict from a score and threshold (pass iff `score >= threshold`)
    pub fn scored(score: f64, threshold: f64) -> Self {
        Self {
            passed: score >= threshold,
            score: Some(score),
            threshold: Some(threshold),
            source: VerdictSource::Scored,
        }
    }

    /// Automatic pass used when scoring is unavailable by configuration
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: None,
            threshold: None,
            source: VerdictSource::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Failure caused by a non-success status from the scorer
    pub fn rejected(status: u16) -> Self {
        Self {
            passed: false,
            score: None,
            threshold: None,
            source: VerdictSource::Rejected { status },
        }
    }
}

/// Scoring transport errors (distinct from a failing score)
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("gate scoring request failed: {0}")]
    Transport(String),

    #[error("gate scoring returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Trait for gate scoring services
#[async_trait]
pub trait GateScorer: Send + Sync {
    /// Human-readable scorer name
    fn name(&self) -> &str;

    /// Score the serialized artifact of a stage
    async fn score(&self, stage: &str, content: &str) -> Result<GateVerdict, ScoringError>;
}
