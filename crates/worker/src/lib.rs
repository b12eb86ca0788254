//! Processor execution for the pipeline engine.
//!
//! - Loaders bring new objects into the store
//! - Steps transform stored objects
//! - Alerts notify endpoints about stored objects, once each
//!
//! Processors are registered in a [`Catalog`] and executed by [`Runner`]s,
//! each driving one processor instance inside its own store session.

pub mod alert;
pub mod catalog;
pub mod endpoints;
pub mod loader;
pub mod pipeline;
pub mod processor;
pub mod runner;
pub mod settings;
pub mod step;

pub use alert::{execute_alert, filter_auto_registered, Alert};
pub use catalog::{Catalog, ProcessorDescriptor};
pub use endpoints::{AlertContext, Email, Endpoint, File, MemoryBuffer, RenderAlert, MEMORY};
pub use loader::{execute_loader, Loader};
pub use pipeline::{DefaultSetup, PipelineSetup};
pub use processor::*;
pub use runner::{execute, wait_all, Launch, RunContext, Runner};
pub use settings::*;
pub use step::{execute_step, Step};
