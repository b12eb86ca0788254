//! Command line front end.
//!
//! A pipeline binary registers its models and processors in a [`Catalog`]
//! and hands it to [`run_cli`]:
//!
//! ```no_run
//! # async fn pipeline() {
//! let catalog = worker::Catalog::new();
//! std::process::exit(pipeline_engine::run_cli(catalog).await);
//! # }
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use store::{schema, StoreClient};
use telemetry::{init_tracing, log_snapshot};
use tracing::{error, info};
use worker::{
    execute_alert, execute_loader, execute_step, wait_all, Catalog, ProcessorDescriptor,
    RunContext, Runner,
};

use crate::config::load_config;

/// Exit code for invalid command line usage.
pub const USAGE_EXIT_CODE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "pipeline", version, about = "Run a loader/step/alert pipeline")]
pub struct Cli {
    /// Configuration file (default: config/default.toml when present)
    #[arg(short, long, global = true, env = "PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the tables of every registered model
    Createdb,

    /// Run the configured loader
    Load {
        /// Run a single runner in this process
        #[arg(long)]
        sync: bool,
    },

    /// Run the configured steps
    Run {
        /// Step names to run instead of every configured step
        #[arg(long, num_args = 1.., conflicts_with = "groups")]
        steps: Vec<String>,

        /// Only steps in any of these groups
        #[arg(long, num_args = 1..)]
        groups: Vec<String>,

        #[arg(long)]
        sync: bool,
    },

    /// Run the configured alerts
    CheckAlerts {
        /// Alert names to run instead of every configured alert
        #[arg(long, num_args = 1.., conflicts_with = "groups")]
        alerts: Vec<String>,

        /// Only alerts in any of these groups
        #[arg(long, num_args = 1..)]
        groups: Vec<String>,

        #[arg(long)]
        sync: bool,
    },

    /// List the groups of the configured steps and alerts
    Groups,
}

/// Parses the process arguments and runs the command. Returns the exit code.
pub async fn run_cli(catalog: Catalog) -> i32 {
    let cli = Cli::parse();
    match run(cli, &catalog).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

/// Runs a parsed command against `catalog`.
///
/// The configured pipeline setup hook runs before the store is opened and its
/// teardown after the command finished, whatever the outcome.
pub async fn run(cli: Cli, catalog: &Catalog) -> Result<i32> {
    dotenvy::dotenv().ok();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log);

    let mut setup = catalog.load_pipeline_setup(&config.pipeline)?;
    setup.setup().context("Pipeline setup failed")?;

    let outcome = dispatch(&cli.command, catalog, &config).await;
    let torn = setup.teardown().context("Pipeline teardown failed");

    let code = outcome?;
    torn?;
    Ok(code)
}

async fn dispatch(command: &Commands, catalog: &Catalog, config: &crate::Config) -> Result<i32> {
    if let Commands::Groups = command {
        let steps = catalog.steps_groups(&config.pipeline)?;
        let alerts = catalog.alerts_groups(&config.pipeline)?;
        println!("Steps groups: {}", steps.join(", "));
        println!("Alerts groups: {}", alerts.join(", "));
        return Ok(0);
    }

    let store = StoreClient::connect(config.store.clone(), catalog.models().clone())
        .await
        .context("Failed to connect to store")?;
    let ctx = RunContext::new(store.clone(), config.pipeline.clone());

    let outcome = execute_command(command, catalog, &ctx).await;
    store.close().await;
    outcome
}

async fn execute_command(command: &Commands, catalog: &Catalog, ctx: &RunContext) -> Result<i32> {
    match command {
        Commands::Createdb => {
            let tables = schema::create_all(&ctx.store).await?;
            info!(tables = tables.len(), "Database created");
            println!("Created tables: {}", tables.join(", "));
            Ok(0)
        }

        Commands::Load { sync } => {
            let loader = catalog.load_loader(&ctx.settings)?;
            let runners = execute_loader(&loader, ctx, *sync).await?;
            finish(runners).await
        }

        Commands::Run {
            steps,
            groups,
            sync,
        } => {
            let available = catalog.load_steps(&ctx.settings, as_filter(groups))?;
            let selected = match select("step", available, steps) {
                Ok(selected) => selected,
                Err(message) => return usage_error(message),
            };
            let mut runners = Vec::new();
            for step in &selected {
                runners.extend(execute_step(step, ctx, *sync).await?);
            }
            finish(runners).await
        }

        Commands::CheckAlerts {
            alerts,
            groups,
            sync,
        } => {
            let available = catalog.load_alerts(&ctx.settings, as_filter(groups))?;
            let selected = match select("alert", available, alerts) {
                Ok(selected) => selected,
                Err(message) => return usage_error(message),
            };
            let mut runners = Vec::new();
            for alert in &selected {
                runners.extend(execute_alert(alert, ctx, *sync).await?);
            }
            finish(runners).await
        }

        Commands::Groups => Ok(0),
    }
}

fn as_filter(groups: &[String]) -> Option<&[String]> {
    if groups.is_empty() {
        None
    } else {
        Some(groups)
    }
}

/// Picks `names` out of `available` by short name, in the order given.
/// No names selects everything available.
fn select(
    what: &str,
    available: Vec<ProcessorDescriptor>,
    names: &[String],
) -> std::result::Result<Vec<ProcessorDescriptor>, String> {
    if names.is_empty() {
        return Ok(available);
    }

    let mut seen = BTreeSet::new();
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(format!("Duplicated {} name '{}'", what, name));
        }
        let descriptor = available.iter().find(|d| d.name() == name).ok_or_else(|| {
            let choices: Vec<&str> = available.iter().map(|d| d.name()).collect();
            format!(
                "Invalid {} name '{}' (choose from: {})",
                what,
                name,
                choices.join(", ")
            )
        })?;
        selected.push(descriptor.clone());
    }
    Ok(selected)
}

fn usage_error(message: String) -> Result<i32> {
    let err = Cli::command().error(ErrorKind::InvalidValue, message);
    err.print().context("Failed to print usage error")?;
    Ok(USAGE_EXIT_CODE)
}

/// Waits for every started runner and sums their exit codes.
async fn finish(mut runners: Vec<Runner>) -> Result<i32> {
    let code = wait_all(&mut runners).await;
    log_snapshot();
    Ok(code)
}
