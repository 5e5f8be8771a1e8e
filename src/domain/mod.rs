//! Domain types for the orchestrator.
//!
//! This module contains the core data structures:
//! - Task: Caller-supplied specifications and runtimes
//! - Artifact: Plan, code, execution results and test reports
//! - Run: Pipeline run state and outcomes
//! - Events: Lifecycle events exchanged with the broker

pub mod artifact;
pub mod events;
pub mod run;
pub mod task;

// Re-export commonly used types
pub use artifact::{Check, CheckStatus, Code, CodeTask, ExecutionResult, Plan, PlanStep, TestReport};
pub use events::LifecycleEvent;
pub use run::{Gate, GateFailure, PipelineOutcome, PipelineResult, PipelineRun, Stage};
pub use task::{Runtime, TaskSpecification};
