//! Transactional store for the pipeline engine.
//!
//! SQLite through `sqlx`: a pooled [`StoreClient`] hands out [`Session`]s,
//! one transaction each. Also holds the alert ledger model.

pub mod client;
pub mod config;
pub mod ledger;
pub mod query;
pub mod registry;
pub mod schema;
pub mod session;

pub use client::*;
pub use config::*;
pub use ledger::{Alerted, ALERTED_META, ALERTED_TABLE};
pub use registry::ModelRegistry;
pub use session::Session;
