//! Gated execution pipeline.
//!
//! A run moves received -> planned -> coded -> tested -> complete. Each
//! artifact is scored by its gate before the next stage derives from it; a
//! rejected gate ends the run with every artifact produced so far. Every
//! transition publishes one lifecycle event, and publish failures never
//! change the run's outcome.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    BackendError, Backends, ContainerBackend, ExecutionRequest, GateScorer, GateVerdict,
    HttpGateScorer, ScoringError, SkippingScorer, VerdictSource, WasmBackend,
};
use crate::config::{GateMode, ResolvedConfig};
use crate::domain::events::{
    self, EVAL_ERROR, EVAL_RESULT, EVAL_SKIPPED, RUN_COMPLETE, RUN_ERROR, RUN_RECEIVED,
};
use crate::domain::{
    ExecutionResult, Gate, GateFailure, PipelineOutcome, PipelineResult, PipelineRun, Runtime,
    Stage, TaskSpecification,
};
use crate::events::EventPublisher;

use super::runtime;
use super::safety::{LimitViolation, TaskLimits};
use super::synthesis;

/// Errors that abort a run (as opposed to a gate rejecting it)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Malformed task specification: {0}")]
    MalformedSpec(String),

    #[error("Task specification rejected: {0}")]
    Limit(#[from] LimitViolation),

    #[error("Failed to serialize artifact: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Task {step_id} exceeded its {seconds}s budget on {runtime}")]
    Timeout {
        runtime: Runtime,
        step_id: String,
        seconds: u64,
    },

    #[error("{gate} scoring exceeded its {seconds}s deadline")]
    ScoringTimeout { gate: Gate, seconds: u64 },

    #[error("{gate} failed before a plan was derived")]
    MissingArtifact { gate: Gate },
}

/// Runs task specifications through the gates
pub struct GatePipeline {
    publisher: Arc<EventPublisher>,
    scorer: Arc<dyn GateScorer>,
    backends: Backends,
    limits: TaskLimits,
}

impl GatePipeline {
    pub fn new(
        publisher: Arc<EventPublisher>,
        scorer: Arc<dyn GateScorer>,
        backends: Backends,
        limits: TaskLimits,
    ) -> Self {
        Self {
            publisher,
            scorer,
            backends,
            limits,
        }
    }

    /// Pipeline wired to the configured scorer and backends
    pub fn from_config(config: &ResolvedConfig, publisher: Arc<EventPublisher>) -> Self {
        let backends = Backends::new(
            Arc::new(WasmBackend::new(config.runtime.wasm_url.clone())),
            Arc::new(ContainerBackend::new()),
        );
        Self::new(
            publisher,
            scorer_for(&config.scoring.gate_mode()),
            backends,
            config.limits.clone(),
        )
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Parse a raw specification and run it
    pub async fn run_value(&self, spec: Value) -> Result<PipelineOutcome, PipelineError> {
        match TaskSpecification::from_value(spec) {
            Ok(spec) => self.run(spec).await,
            Err(e) => {
                let err = PipelineError::MalformedSpec(e.to_string());
                self.report_error(&err).await;
                Err(err)
            }
        }
    }

    /// Publish `run:error` for a failure that happened before a run existed
    pub async fn report_error(&self, err: &PipelineError) -> Uuid {
        let run_id = Uuid::new_v4();
        warn!(%run_id, error = %err, "Rejected run request");
        self.publisher
            .publish_detached(
                RUN_ERROR,
                json!({ "runId": run_id, "error": err.to_string() }),
            )
            .await;
        run_id
    }

    /// Run one specification through every gate
    pub async fn run(&self, spec: TaskSpecification) -> Result<PipelineOutcome, PipelineError> {
        let mut run = PipelineRun::new(spec);
        let run_id = run.id;

        match self.drive(&mut run).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                run.advance(Stage::Failed);
                error!(%run_id, error = %e, "Run failed");
                self.publisher
                    .publish_detached(
                        RUN_ERROR,
                        json!({ "runId": run_id, "error": e.to_string() }),
                    )
                    .await;
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(run_id = %run.id))]
    async fn drive(&self, run: &mut PipelineRun) -> Result<PipelineOutcome, PipelineError> {
        info!("Starting run");
        self.publisher
            .publish_detached(
                RUN_RECEIVED,
                json!({ "runId": run.id, "spec": serde_json::to_value(&run.spec)? }),
            )
            .await;

        self.limits.validate(&run.spec)?;

        // G1: plan
        let plan = synthesis::plan(&run.spec);
        run.plan = Some(plan.clone());
        if !self.pass_gate(run, Gate::G1, "plan", &plan).await? {
            return self.rejected(run, Gate::G1);
        }
        run.advance(Stage::Planned);

        // G2: code
        let code = synthesis::code(&plan);
        run.code = Some(code.clone());
        if !self.pass_gate(run, Gate::G2, "code", &code).await? {
            return self.rejected(run, Gate::G2);
        }
        run.advance(Stage::Coded);

        // Dispatch, strictly in task order
        let budget = self.limits.time_budget(&run.spec);
        for task in &code.tasks {
            let runtime = runtime::select(&run.spec);
            let request = ExecutionRequest {
                task: task.clone(),
                language: run.spec.language.clone(),
                timeout: budget,
            };

            let started = Instant::now();
            let output = tokio::time::timeout(
                budget,
                self.backends.for_runtime(runtime).execute(&request),
            )
            .await
            .map_err(|_| PipelineError::Timeout {
                runtime,
                step_id: task.id.clone(),
                seconds: budget.as_secs(),
            })??;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            debug!(step = %task.id, %runtime, elapsed_ms, "Task executed");
            run.execution_results.push(ExecutionResult {
                step_id: task.id.clone(),
                runtime: output.runtime,
                detail: output.detail,
                execution_time_ms: output.execution_time_ms,
                exit_code: output.exit_code,
            });

            self.publisher
                .publish_detached(
                    &events::runtime_step(runtime),
                    json!({ "runId": run.id, "step": task.id, "elapsedMs": elapsed_ms }),
                )
                .await;
        }

        // G3: test report
        let test = synthesis::test_report(&run.execution_results);
        run.test = Some(test.clone());
        if !self.pass_gate(run, Gate::G3, "test", &test).await? {
            return self.rejected(run, Gate::G3);
        }
        run.advance(Stage::Tested);

        self.publisher
            .publish_detached(RUN_COMPLETE, json!({ "runId": run.id }))
            .await;
        run.advance(Stage::Complete);
        info!(results = run.execution_results.len(), "Run completed");

        Ok(PipelineOutcome::Complete(PipelineResult {
            run_id: run.id,
            plan,
            code,
            test,
            execution_results: run.execution_results.clone(),
        }))
    }

    /// Score an artifact and publish the gate's pass/fail event
    async fn pass_gate<T: Serialize>(
        &self,
        run: &mut PipelineRun,
        gate: Gate,
        artifact_key: &str,
        artifact: &T,
    ) -> Result<bool, PipelineError> {
        let artifact = serde_json::to_value(artifact)?;
        let verdict = self.evaluate(gate, &artifact).await?;

        let mut payload = json!({ "runId": run.id });
        payload[artifact_key] = artifact;

        if verdict.passed {
            self.publisher
                .publish_detached(&events::gate_passed(gate), payload)
                .await;
            return Ok(true);
        }

        warn!(%gate, score = ?verdict.score, threshold = ?verdict.threshold, "Gate rejected run");
        self.publisher
            .publish_detached(&events::gate_failed(gate), payload)
            .await;
        run.fail_at(gate);
        Ok(false)
    }

    /// Ask the scorer for a verdict and publish what it said
    async fn evaluate(&self, gate: Gate, artifact: &Value) -> Result<GateVerdict, PipelineError> {
        let stage = gate.stage();
        let deadline = self.limits.scoring_timeout();
        let content = artifact.to_string();
        let verdict = tokio::time::timeout(deadline, self.scorer.score(stage, &content))
            .await
            .map_err(|_| PipelineError::ScoringTimeout {
                gate,
                seconds: deadline.as_secs(),
            })??;

        let (event_type, payload) = match &verdict.source {
            VerdictSource::Skipped { reason } => {
                (EVAL_SKIPPED, json!({ "stage": stage, "reason": reason }))
            }
            VerdictSource::Scored => (
                EVAL_RESULT,
                json!({
                    "stage": stage,
                    "score": verdict.score,
                    "threshold": verdict.threshold,
                }),
            ),
            VerdictSource::Rejected { status } => {
                (EVAL_ERROR, json!({ "stage": stage, "status": status }))
            }
        };
        self.publisher.publish_detached(event_type, payload).await;

        Ok(verdict)
    }

    fn rejected(&self, run: &PipelineRun, gate: Gate) -> Result<PipelineOutcome, PipelineError> {
        GateFailure::from_run(run, gate)
            .map(PipelineOutcome::GateFailed)
            .ok_or(PipelineError::MissingArtifact { gate })
    }
}

/// Scorer for a gate mode; degraded mode is logged once here
pub fn scorer_for(mode: &GateMode) -> Arc<dyn GateScorer> {
    match mode {
        GateMode::Scored { url, api_key } => {
            info!(url = %url, "Gate scoring enabled");
            Arc::new(HttpGateScorer::new(url.clone(), api_key.clone()))
        }
        GateMode::Degraded => {
            warn!("Gate scoring not configured; gates pass without evaluation");
            Arc::new(SkippingScorer::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Broker, InMemoryBroker, MemoryBrokerSettings};
    use crate::domain::LifecycleEvent;
    use std::time::Duration;

    async fn drain(consumer: &Arc<dyn crate::events::BrokerConsumer>) -> Vec<String> {
        let mut types = Vec::new();
        for message in consumer.receive(64).await.unwrap() {
            types.push(LifecycleEvent::from_bytes(&message.body).unwrap().event_type);
        }
        types
    }

    #[tokio::test]
    async fn test_degraded_run_completes_with_skipped_evaluations() {
        let broker = Arc::new(InMemoryBroker::with_settings(
            "umca-events",
            MemoryBrokerSettings {
                await_duration: Duration::from_millis(20),
                invisible_duration: Duration::from_secs(5),
            },
        ));
        let consumer = broker.connect_consumer("test").await.unwrap();

        let publisher = Arc::new(EventPublisher::new(broker.clone()));
        let pipeline = GatePipeline::new(
            publisher,
            scorer_for(&GateMode::Degraded),
            Backends::new(
                Arc::new(ContainerBackend::new()),
                Arc::new(ContainerBackend::new()),
            ),
            TaskLimits::default(),
        );

        let outcome = pipeline
            .run(TaskSpecification::new("hello"))
            .await
            .unwrap();
        assert!(outcome.is_complete());

        let types = drain(&consumer).await;
        assert_eq!(types.first().map(String::as_str), Some(RUN_RECEIVED));
        assert_eq!(types.last().map(String::as_str), Some(RUN_COMPLETE));
        assert_eq!(types.iter().filter(|t| *t == EVAL_SKIPPED).count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_spec_publishes_run_error() {
        let broker = Arc::new(InMemoryBroker::with_settings(
            "umca-events",
            MemoryBrokerSettings {
                await_duration: Duration::from_millis(20),
                invisible_duration: Duration::from_secs(5),
            },
        ));
        let consumer = broker.connect_consumer("test").await.unwrap();
        let pipeline = GatePipeline::new(
            Arc::new(EventPublisher::new(broker.clone())),
            scorer_for(&GateMode::Degraded),
            Backends::new(
                Arc::new(ContainerBackend::new()),
                Arc::new(ContainerBackend::new()),
            ),
            TaskLimits::default(),
        );

        let result = pipeline.run_value(json!("not an object")).await;
        assert!(matches!(result, Err(PipelineError::MalformedSpec(_))));
        assert_eq!(drain(&consumer).await, vec![RUN_ERROR.to_string()]);
    }
}
