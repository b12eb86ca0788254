//! Layered configuration: defaults, then a TOML file, then `PIPELINE__*`
//! environment variables.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use store::StoreConfig;
use telemetry::TracingConfig;
use worker::PipelineSettings;

/// Default configuration file, read when present.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: TracingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Load configuration from `path` (required) or the default file (optional),
/// overridden by the environment, e.g. `PIPELINE__STORE__URL` or
/// `PIPELINE__PIPELINE__STEPS=steps.Calibrate,steps.Stack`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE)
            .required(false)
            .format(config::FileFormat::Toml),
    };

    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(file)
        .add_source(
            config::Environment::default()
                .prefix("PIPELINE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pipeline.steps")
                .with_list_parse_key("pipeline.alerts")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
