//! Lifecycle events published to the broker and fanned out to stream clients.
//!
//! Events are immutable once created. Their `type` is a colon-namespaced
//! string (`gate:G1:passed`, `run:error`) rather than a closed enum because
//! the broker carries events from any publisher, not only this pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::Gate;
use super::task::Runtime;

pub const RUN_RECEIVED: &str = "run:received";
pub const RUN_COMPLETE: &str = "run:complete";
pub const RUN_ERROR: &str = "run:error";
pub const EVAL_SKIPPED: &str = "eval:skipped";
pub const EVAL_RESULT: &str = "eval:result";
pub const EVAL_ERROR: &str = "eval:error";
pub const SSE_CONNECTED: &str = "sse:connected";
pub const CONSUMER_ERROR: &str = "runtime:consumer-error";
pub const WELCOME: &str = "welcome";

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Unique id; redelivered copies keep the same id
    pub id: Uuid,

    /// Colon-namespaced event type
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary structured payload
    pub payload: serde_json::Value,

    /// When the event was created
    pub emitted_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// Synthetic event handed to every newly attached stream client
    pub fn welcome() -> Self {
        Self::new(WELCOME, serde_json::json!({ "connected": true }))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// `gate:<name>:passed`
pub fn gate_passed(gate: Gate) -> String {
    format!("gate:{}:passed", gate)
}

/// `gate:<name>:failed`
pub fn gate_failed(gate: Gate) -> String {
    format!("gate:{}:failed", gate)
}

/// `runtime:<wasm|container>`
pub fn runtime_step(runtime: Runtime) -> String {
    format!("runtime:{}", runtime)
}

/// Whether an event type ends a pipeline run
pub fn is_terminal(event_type: &str) -> bool {
    event_type == RUN_COMPLETE
        || event_type == RUN_ERROR
        || (event_type.starts_with("gate:") && event_type.ends_with(":failed"))
}
