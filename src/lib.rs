//! Pipeline engine: loaders bring objects into a transactional store, steps
//! transform them and alerts notify endpoints about them.
//!
//! The framework crates are re-exported here; a pipeline binary builds a
//! [`Catalog`] and calls [`run_cli`].

pub mod cli;
pub mod config;

pub use cli::{run, run_cli, Cli, Commands, USAGE_EXIT_CODE};
pub use config::{load_config, Config};

pub use engine_core;
pub use store;
pub use telemetry;
pub use worker;
pub use worker::Catalog;
