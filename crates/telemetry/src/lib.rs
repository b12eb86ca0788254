//! Telemetry for the pipeline engine.
//!
//! Structured logging through `tracing` and an in-process metrics registry;
//! no external collectors.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::*;
pub use tracing_setup::*;
