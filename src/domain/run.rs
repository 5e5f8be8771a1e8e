//! Pipeline run state.
//!
//! A run lives only as long as the request that started it. It records the
//! current stage and every artifact produced so far so that a gate failure can
//! return exactly what was accumulated before it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::{Code, ExecutionResult, Plan, TestReport};
use super::task::TaskSpecification;

/// A named checkpoint a run must pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    /// Authentication (enforced before the pipeline starts)
    G0,
    /// Plan review
    G1,
    /// Code review
    G2,
    /// Test review
    G3,
}

impl Gate {
    /// Stage name sent to the scoring service
    pub fn stage(&self) -> &'static str {
        match self {
            Self::G0 => "auth",
            Self::G1 => "plan",
            Self::G2 => "research",
            Self::G3 => "architecture",
        }
    }

    /// Caller-facing message when this gate rejects a run
    pub fn failure_message(&self) -> &'static str {
        match self {
            Self::G0 => "Authentication gate failed",
            Self::G1 => "Plan gate failed",
            Self::G2 => "Research gate failed",
            Self::G3 => "Architecture gate failed",
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::G0 => "G0",
            Self::G1 => "G1",
            Self::G2 => "G2",
            Self::G3 => "G3",
        };
        f.write_str(name)
    }
}

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Planned,
    Coded,
    Tested,
    Complete,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Specification the run was started with
    pub spec: TaskSpecification,

    /// Current stage
    pub stage: Stage,

    pub plan: Option<Plan>,
    pub code: Option<Code>,
    pub execution_results: Vec<ExecutionResult>,
    pub test: Option<TestReport>,

    /// Gate that stopped the run, if any
    pub failed_gate: Option<Gate>,
}

impl PipelineRun {
    pub fn new(spec: TaskSpecification) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            stage: Stage::Received,
            plan: None,
            code: None,
            execution_results: Vec::new(),
            test: None,
            failed_gate: None,
        }
    }

    /// Advance to a later stage.
    ///
    /// Terminal stages are sticky.
    pub fn advance(&mut self, stage: Stage) {
        if !self.stage.is_terminal() {
            self.stage = stage;
        }
    }

    /// Mark the run as stopped by `gate`
    pub fn fail_at(&mut self, gate: Gate) {
        self.failed_gate = Some(gate);
        self.advance(Stage::Failed);
    }
}

/// Result of a run where every gate passed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub plan: Plan,
    pub code: Code,
    pub test: TestReport,
    pub execution_results: Vec<ExecutionResult>,
}

/// A gate rejected the run; carries every artifact produced before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateFailure {
    pub error: String,
    pub gate: Gate,
    pub run_id: Uuid,
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestReport>,
}

impl GateFailure {
    /// Build a failure from the run's accumulated artifacts.
    ///
    /// Returns `None` if the run has no plan yet, which cannot happen once
    /// G1 has been evaluated.
    pub fn from_run(run: &PipelineRun, gate: Gate) -> Option<Self> {
        Some(Self {
            error: gate.failure_message().to_string(),
            gate,
            run_id: run.id,
            plan: run.plan.clone()?,
            code: run.code.clone(),
            test: run.test.clone(),
        })
    }
}

/// Terminal outcome of a run that did not hit a pipeline error
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Complete(PipelineResult),
    GateFailed(GateFailure),
}

impl PipelineOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::PlanStep;

    fn plan() -> Plan {
        Plan {
            summary: "demo".to_string(),
            steps: vec![PlanStep {
                id: "plan-1".to_string(),
                description: "Review request: demo".to_string(),
            }],
        }
    }

    #[test]
    fn test_run_creation() {
        let run = PipelineRun::new(TaskSpecification::new("demo"));
        assert_eq!(run.stage, Stage::Received);
        assert!(run.plan.is_none());
    }

    #[test]
    fn test_terminal_stage_is_sticky() {
        let mut run = PipelineRun::new(TaskSpecification::default());
        run.fail_at(Gate::G1);
        run.advance(Stage::Coded);

        assert_eq!(run.stage, Stage::Failed);
        assert_eq!(run.failed_gate, Some(Gate::G1));
    }

    #[test]
    fn test_gate_failure_omits_missing_artifacts() {
        let mut run = PipelineRun::new(TaskSpecification::default());
        assert!(GateFailure::from_run(&run, Gate::G1).is_none());

        run.plan = Some(plan());
        let failure = GateFailure::from_run(&run, Gate::G1).unwrap();
        let json = serde_json::to_value(&failure).unwrap();

        assert_eq!(json["error"], "Plan gate failed");
        assert_eq!(json["gate"], "G1");
        assert!(json.get("plan").is_some());
        assert!(json.get("code").is_none());
        assert!(json.get("test").is_none());
    }
}
