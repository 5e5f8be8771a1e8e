//! Container runtime backend.
//!
//! Simulated: the container runtime is an external collaborator, so this
//! backend only models its latency and response shape.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::Runtime;

use super::{BackendError, BackendOutput, ExecutionBackend, ExecutionRequest};

/// Local container runtime simulation
#[derive(Debug, Clone, Default)]
pub struct ContainerBackend {
    /// Artificial latency per execution
    latency: Duration,
}

impl ContainerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a fixed start-up latency per task
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn runtime(&self) -> Runtime {
        Runtime::Container
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendOutput, BackendError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        Ok(BackendOutput {
            detail: format!("Executed: {}", request.task.instruction),
            runtime: Runtime::Container,
            execution_time_ms: started.elapsed().as_millis() as u64,
            exit_code: Some(0),
        })
    }
}
