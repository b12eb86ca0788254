//! Loaders bring new objects into the store from outside it.

use std::marker::PhantomData;

use engine_core::Result;
use futures::StreamExt;
use store::Session;
use telemetry::metrics;

use crate::catalog::ProcessorDescriptor;
use crate::processor::{finish, Generated, Processor, ProcessorKind};
use crate::runner::{execute, Launch, RunContext, Runner};

/// Produces brand-new objects; there is no default query.
#[async_trait::async_trait]
pub trait Loader: Processor {
    async fn generate(&mut self, session: &mut Session) -> Result<Generated>;
}

pub(crate) struct LoaderLauncher<P, F> {
    factory: F,
    _marker: PhantomData<fn() -> P>,
}

impl<P, F> LoaderLauncher<P, F> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<P, F> Launch for LoaderLauncher<P, F>
where
    P: Loader,
    F: Fn(usize) -> P + Send + Sync + 'static,
{
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Loader
    }

    async fn launch(&self, ctx: &RunContext, proc: usize) -> Result<()> {
        let mut session = ctx.store.session().await?;
        let outcome = run_loader((self.factory)(proc), &mut session).await;
        let closed = session.close(&outcome).await;
        outcome.and(closed)
    }
}

async fn run_loader<P: Loader>(mut loader: P, session: &mut Session) -> Result<()> {
    loader.setup(session).await?;
    let outcome = load_all(&mut loader, session).await;
    let torn = loader.teardown(session, outcome.as_ref().err()).await;
    finish(outcome, torn)
}

async fn load_all<P: Loader>(loader: &mut P, session: &mut Session) -> Result<()> {
    let mut objects = loader.generate(session).await?;
    while let Some(obj) = objects.next().await {
        let obj = obj?;
        metrics().objects_generated.inc();
        loader.validate(session, &*obj)?;
        loader.save(session, &*obj);
    }
    Ok(())
}

/// Runs the loader `target` with `procno` runners (one, inline, when `sync`).
pub async fn execute_loader(
    target: &ProcessorDescriptor,
    ctx: &RunContext,
    sync: bool,
) -> Result<Vec<Runner>> {
    execute(ProcessorKind::Loader, target, ctx, sync).await
}
