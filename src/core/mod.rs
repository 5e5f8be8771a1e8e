//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: The gated run state machine
//! - Runtime: Execution runtime selection
//! - Synthesis: Deterministic artifact derivation
//! - Safety: Size and time limits for task specifications

pub mod pipeline;
pub mod runtime;
pub mod safety;
pub mod synthesis;

// Re-export commonly used types
pub use pipeline::{scorer_for, GatePipeline, PipelineError};
pub use runtime::select;
pub use safety::{LimitViolation, TaskLimits};
