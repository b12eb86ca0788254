//! Runners drive one processor instance each.
//!
//! A runner either runs inline (`run`) or on its own tokio task (`start`),
//! observed afterwards only through its exit code (`join`). Every runner opens
//! its own session after it starts; nothing pooled is shared between runners
//! beyond the store client itself.

use std::sync::Arc;
use std::time::Instant;

use engine_core::{Error, Result};
use futures::future::join_all;
use store::StoreClient;
use telemetry::metrics;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::catalog::ProcessorDescriptor;
use crate::processor::ProcessorKind;
use crate::settings::PipelineSettings;

/// What a runner needs to open sessions and read settings.
#[derive(Clone)]
pub struct RunContext {
    pub store: StoreClient,
    pub settings: Arc<PipelineSettings>,
}

impl RunContext {
    pub fn new(store: StoreClient, settings: PipelineSettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }
}

/// Builds one processor instance and drives its full cycle in one session.
#[async_trait::async_trait]
pub trait Launch: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    async fn launch(&self, ctx: &RunContext, proc: usize) -> Result<()>;
}

/// One `(processor, process index)` execution.
#[derive(Debug)]
pub struct Runner {
    kind: ProcessorKind,
    target: Option<ProcessorDescriptor>,
    current_proc: usize,
    handle: Option<JoinHandle<Result<()>>>,
    exit_code: Option<i32>,
}

impl Runner {
    /// Runner accepting only targets of `kind`.
    pub fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            target: None,
            current_proc: 0,
            handle: None,
            exit_code: None,
        }
    }

    /// Binds the target; fails with a type error on a kind mismatch.
    pub fn setup(&mut self, target: &ProcessorDescriptor, proc: usize) -> Result<()> {
        if target.kind() != self.kind {
            return Err(Error::type_error(format!(
                "'{}' is a {}, expected a {}",
                target.path(),
                target.kind(),
                self.kind
            )));
        }
        self.target = Some(target.clone());
        self.current_proc = proc;
        Ok(())
    }

    /// Runs inline, returning the processor's error.
    pub async fn run(&mut self, ctx: &RunContext) -> Result<()> {
        let target = self.bound_target()?;
        let result = drive(target, ctx.clone(), self.current_proc).await;
        self.exit_code = Some(if result.is_ok() { 0 } else { 1 });
        result
    }

    /// Spawns the run on a tokio task.
    pub fn start(&mut self, ctx: RunContext) -> Result<()> {
        if self.handle.is_some() || self.exit_code.is_some() {
            return Err(Error::internal("runner already started"));
        }
        let target = self.bound_target()?;
        self.handle = Some(tokio::spawn(drive(target, ctx, self.current_proc)));
        Ok(())
    }

    /// Waits for a started runner. `0` on success, `1` on error or panic.
    pub async fn join(&mut self) -> i32 {
        if let Some(handle) = self.handle.take() {
            let code = match handle.await {
                Ok(Ok(())) => 0,
                Ok(Err(_)) => 1,
                Err(e) => {
                    error!(proc = self.current_proc + 1, error = %e, "Runner task aborted");
                    1
                }
            };
            self.exit_code = Some(code);
        }
        self.exit_code.unwrap_or(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some() || self.exit_code.is_some()
    }

    pub fn kind(&self) -> ProcessorKind {
        self.kind
    }

    pub fn target(&self) -> Option<&ProcessorDescriptor> {
        self.target.as_ref()
    }

    pub fn current_proc(&self) -> usize {
        self.current_proc
    }

    fn bound_target(&self) -> Result<ProcessorDescriptor> {
        self.target
            .clone()
            .ok_or_else(|| Error::internal("runner has no target, call setup first"))
    }
}

async fn drive(target: ProcessorDescriptor, ctx: RunContext, proc: usize) -> Result<()> {
    let (kind, name) = (target.kind(), target.name());
    info!("Executing {} '{}' #{}", kind, name, proc + 1);

    let m = metrics();
    m.runners_started.inc();
    m.active_runners.inc();
    let start = Instant::now();

    let result = target.launcher().launch(&ctx, proc).await;

    m.active_runners.dec();
    m.runner_latency_ms
        .observe(start.elapsed().as_millis() as u64);

    match &result {
        Ok(()) => {
            m.runners_succeeded.inc();
            info!("Done {} '{}' #{}", kind, name, proc + 1);
        }
        Err(e) => {
            m.runners_failed.inc();
            error!(
                code = e.error_code().unwrap_or("-"),
                error = %e,
                "Failed {} '{}' #{}",
                kind,
                name,
                proc + 1
            );
        }
    }
    result
}

/// Type check, `class_setup`, then one runner per process (exactly one in
/// sync mode, run inline and blocking).
pub async fn execute(
    kind: ProcessorKind,
    target: &ProcessorDescriptor,
    ctx: &RunContext,
    sync: bool,
) -> Result<Vec<Runner>> {
    if target.kind() != kind {
        return Err(Error::type_error(format!(
            "'{}' must be a {}, found a {}",
            target.path(),
            kind,
            target.kind()
        )));
    }
    target.class_setup()?;

    let count = if sync {
        1
    } else {
        target.procno(ctx.settings.debug_process)
    };

    let mut runners = Vec::with_capacity(count);
    for proc in 0..count {
        let mut runner = Runner::new(kind);
        runner.setup(target, proc)?;
        if sync {
            runner.run(ctx).await?;
        } else {
            runner.start(ctx.clone())?;
        }
        runners.push(runner);
    }
    Ok(runners)
}

/// Joins every runner and sums their exit codes.
pub async fn wait_all(runners: &mut [Runner]) -> i32 {
    join_all(runners.iter_mut().map(|r| r.join()))
        .await
        .into_iter()
        .sum()
}
