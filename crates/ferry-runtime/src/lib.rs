//! Ferry Runtime - transfer orchestration
//!
//! This crate wires the pieces into a running service:
//! 1. Select an ordered transport plan for each request
//! 2. Admit sessions FIFO up to the concurrency limit
//! 3. Walk the plan, falling back on timeout, error or unavailability
//! 4. Publish one event per lifecycle transition
//! 5. Track active sessions and answer status queries
//! 6. Drain and shut down cleanly

pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod service;
pub mod stats;
pub mod telemetry;

pub use config::*;
pub use orchestrator::*;
pub use registry::*;
pub use selector::*;
pub use service::*;
pub use stats::*;
pub use telemetry::{init_tracing, LogFormat};
