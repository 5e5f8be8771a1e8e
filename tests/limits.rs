//! Task Limit Integration Tests
//!
//! Size and time-budget enforcement, both directly and through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use umca::adapters::{Backends, ContainerBackend};
use umca::config::GateMode;
use umca::core::{scorer_for, GatePipeline, LimitViolation, PipelineError, TaskLimits};
use umca::domain::events::{RUN_ERROR, RUN_RECEIVED};
use umca::domain::{LifecycleEvent, TaskSpecification};
use umca::events::{Broker, EventPublisher, InMemoryBroker, MemoryBrokerSettings};

#[test]
fn test_max_task_bytes() {
    let limits = TaskLimits {
        max_task_bytes: 100,
        ..Default::default()
    };

    // Within limits
    assert!(limits.validate(&TaskSpecification::new("x".repeat(20))).is_ok());

    // Exceeding limit
    let result = limits.validate(&TaskSpecification::new("x".repeat(200)));
    match result {
        Err(LimitViolation::MaxTaskBytes { actual, limit }) => {
            assert!(actual > 200);
            assert_eq!(limit, 100);
        }
        other => panic!("Expected MaxTaskBytes violation, got {:?}", other),
    }
}

#[test]
fn test_unknown_fields_count_toward_size() {
    let limits = TaskLimits {
        max_task_bytes: 64,
        ..Default::default()
    };
    let spec = TaskSpecification::from_value(json!({
        "task": "t",
        "attachment": "y".repeat(100),
    }))
    .unwrap();

    assert!(limits.validate(&spec).is_err());
}

#[test]
fn test_limits_from_yaml_use_defaults_for_missing_keys() {
    let limits: TaskLimits = serde_yaml::from_str("max_task_bytes: 4096\n").unwrap();

    assert_eq!(limits.max_task_bytes, 4096);
    assert_eq!(limits.default_time_budget_seconds, 30);
    assert_eq!(limits.max_time_budget_seconds, 600);
}

#[test]
fn test_time_budget_override_and_cap() {
    let limits = TaskLimits {
        default_time_budget_seconds: 10,
        max_time_budget_seconds: 60,
        ..Default::default()
    };

    assert_eq!(
        limits.time_budget(&TaskSpecification::new("t")),
        Duration::from_secs(10)
    );
    assert_eq!(
        limits.time_budget(&TaskSpecification::new("t").with_max_seconds(2)),
        Duration::from_secs(2)
    );
    assert_eq!(
        limits.time_budget(&TaskSpecification::new("t").with_max_seconds(3600)),
        Duration::from_secs(60)
    );
}

#[tokio::test]
async fn test_oversized_spec_aborts_run() {
    let broker = Arc::new(InMemoryBroker::with_settings(
        "umca-events",
        MemoryBrokerSettings {
            await_duration: Duration::from_millis(20),
            invisible_duration: Duration::from_secs(30),
        },
    ));
    let consumer = broker.connect_consumer("observer").await.unwrap();

    let pipeline = GatePipeline::new(
        Arc::new(EventPublisher::new(broker.clone())),
        scorer_for(&GateMode::Degraded),
        Backends::new(
            Arc::new(ContainerBackend::new()),
            Arc::new(ContainerBackend::new()),
        ),
        TaskLimits {
            max_task_bytes: 64,
            ..Default::default()
        },
    );

    let result = pipeline.run(TaskSpecification::new("x".repeat(500))).await;
    assert!(matches!(
        result,
        Err(PipelineError::Limit(LimitViolation::MaxTaskBytes { .. }))
    ));

    let types: Vec<String> = consumer
        .receive(16)
        .await
        .unwrap()
        .iter()
        .map(|m| LifecycleEvent::from_bytes(&m.body).unwrap().event_type)
        .collect();
    assert_eq!(types, vec![RUN_RECEIVED, RUN_ERROR]);
}
