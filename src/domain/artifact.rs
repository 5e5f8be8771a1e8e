//! Artifacts accumulated by a pipeline run.
//!
//! Each stage produces one artifact (plan, code, test report) that the
//! following stage derives from. All of them serialize with camelCase keys
//! because they are returned to HTTP callers verbatim.

use serde::{Deserialize, Serialize};

use super::task::Runtime;

/// A plan derived from a task specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// One-line summary of the task
    pub summary: String,

    /// Ordered steps
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub description: String,
}

/// Executable tasks derived from a plan, one per plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    pub tasks: Vec<CodeTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeTask {
    pub id: String,
    pub instruction: String,
}

/// Outcome of dispatching one code task to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Id of the code task that was executed
    pub step_id: String,

    /// Backend that ran it
    pub runtime: Runtime,

    /// Free-text detail reported by the backend
    pub detail: String,

    /// Backend-reported execution time
    pub execution_time_ms: u64,

    /// Exit code, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Whether the backend reported success
    pub fn succeeded(&self) -> bool {
        self.exit_code.unwrap_or(0) == 0
    }
}

/// Checks derived from execution results, one per result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub checks: Vec<Check>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.status == CheckStatus::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub id: String,
    pub status: CheckStatus,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
}
