//! Limits applied to task specifications before and during a run.
//!
//! Prevents oversized submissions and unbounded backend calls through:
//! - A maximum serialized specification size
//! - A per-task dispatch timeout (the task's `maxSeconds`, or a default)
//! - A deadline on each gate scoring call

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TaskSpecification;

/// Limits for pipeline runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLimits {
    /// Maximum serialized specification size in bytes (default: 1MB)
    #[serde(default = "default_max_task_bytes")]
    pub max_task_bytes: u64,

    /// Per-task time budget when the task sets none (default: 30s)
    #[serde(default = "default_time_budget")]
    pub default_time_budget_seconds: u64,

    /// Upper bound on any caller-requested time budget (default: 10 min)
    #[serde(default = "default_max_time_budget")]
    pub max_time_budget_seconds: u64,

    /// Deadline for one gate scoring call (default: 30s)
    #[serde(default = "default_scoring_timeout")]
    pub scoring_timeout_seconds: u64,
}

fn default_max_task_bytes() -> u64 {
    1024 * 1024
}
fn default_time_budget() -> u64 {
    30
}
fn default_max_time_budget() -> u64 {
    600
}
fn default_scoring_timeout() -> u64 {
    30
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_task_bytes: default_max_task_bytes(),
            default_time_budget_seconds: default_time_budget(),
            max_time_budget_seconds: default_max_time_budget(),
            scoring_timeout_seconds: default_scoring_timeout(),
        }
    }
}

impl TaskLimits {
    /// Validate a specification against the size limit
    pub fn validate(&self, spec: &TaskSpecification) -> Result<(), LimitViolation> {
        let size = serde_json::to_vec(spec)
            .map(|bytes| bytes.len() as u64)
            .map_err(|e| LimitViolation::Unserializable(e.to_string()))?;

        if size > self.max_task_bytes {
            return Err(LimitViolation::MaxTaskBytes {
                actual: size,
                limit: self.max_task_bytes,
            });
        }

        if spec.max_seconds == Some(0) {
            return Err(LimitViolation::ZeroTimeBudget);
        }

        Ok(())
    }

    /// Effective per-task timeout for a specification
    pub fn time_budget(&self, spec: &TaskSpecification) -> Duration {
        let seconds = spec
            .max_seconds
            .unwrap_or(self.default_time_budget_seconds)
            .min(self.max_time_budget_seconds);
        Duration::from_secs(seconds)
    }

    /// Deadline for a single gate scoring call
    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_secs(self.scoring_timeout_seconds.max(1))
    }
}

/// Limit violations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LimitViolation {
    #[error("Task specification too large: {actual} > {limit} bytes")]
    MaxTaskBytes { actual: u64, limit: u64 },

    #[error("Task time budget must be greater than zero")]
    ZeroTimeBudget,

    #[error("Task specification cannot be serialized: {0}")]
    Unserializable(String),
}
