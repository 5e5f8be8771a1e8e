//! umca - Gated execution pipeline with live event streaming
//!
//! Accepts task specifications over HTTP, moves each one through a gated
//! plan -> code -> execute -> test pipeline, and streams every lifecycle
//! event to connected clients.
//!
//! # Architecture
//!
//! Events flow through a message broker:
//! - The pipeline publishes one event per transition
//! - A single bridge task consumes the topic and fans events out
//! - Stream clients receive whatever is published while they are attached
//!
//! # Modules
//!
//! - `adapters`: Execution backends and the gate scoring service
//! - `auth`: Bearer-token verification
//! - `core`: Pipeline, runtime selection, artifact synthesis, limits
//! - `domain`: Data structures (TaskSpecification, artifacts, events)
//! - `events`: Broker, publisher, bridge and broadcast channel
//! - `server`: HTTP routes and the event stream
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the API
//! umca serve --listen 0.0.0.0:8787
//!
//! # Run one specification locally
//! echo '{"task":"hello","preferWasm":true}' | umca run
//! ```

pub mod adapters;
pub mod auth;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod events;
pub mod server;

// Re-export main types at crate root for convenience
pub use crate::core::{GatePipeline, PipelineError};
pub use domain::{GateFailure, LifecycleEvent, PipelineOutcome, PipelineResult, TaskSpecification};
pub use events::{BroadcastChannel, EventBridge, EventPublisher};
pub use server::{build_router, AppState};
