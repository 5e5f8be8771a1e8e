//! Artifact derivation: spec -> plan -> code, results -> test report.
//!
//! All derivations are deterministic so that a given specification always
//! produces the same plan and code.

use crate::domain::{
    Check, CheckStatus, Code, CodeTask, ExecutionResult, Plan, PlanStep, Runtime,
    TaskSpecification, TestReport,
};

use super::runtime;

/// Derive a plan from a task specification
pub fn plan(spec: &TaskSpecification) -> Plan {
    let summary = spec.summary().to_string();
    let sandbox = match runtime::select(spec) {
        Runtime::Wasm => "WASM sandbox",
        Runtime::Container => "container runtime",
    };

    Plan {
        steps: vec![
            PlanStep {
                id: "plan-1".to_string(),
                description: format!("Review request: {}", summary),
            },
            PlanStep {
                id: "plan-2".to_string(),
                description: format!("Execute minimal implementation in {}", sandbox),
            },
        ],
        summary,
    }
}

/// Derive one code task per plan step, in plan order
pub fn code(plan: &Plan) -> Code {
    Code {
        tasks: plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| CodeTask {
                id: format!("task-{}", index + 1),
                instruction: format!("Echo outcome for {}", step.id),
            })
            .collect(),
    }
}

/// Derive one check per execution result, in result order
pub fn test_report(results: &[ExecutionResult]) -> TestReport {
    TestReport {
        checks: results
            .iter()
            .map(|result| Check {
                id: format!("check-{}", result.step_id),
                status: if result.succeeded() {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                },
                notes: result.detail.clone(),
            })
            .collect(),
    }
}
