//! Core types, model metadata, and declarative queries for the pipeline engine.

pub mod error;
pub mod model;
pub mod query;

pub use error::{DbErrorCode, Error, Result};
pub use model::*;
pub use query::*;
pub use serde_json::Value;
