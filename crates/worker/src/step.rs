//! Steps transform objects already in the store.

use std::marker::PhantomData;

use engine_core::{Condition, Model, ModelMeta, Order, Query, Result};
use futures::StreamExt;
use store::Session;
use telemetry::metrics;

use crate::catalog::ProcessorDescriptor;
use crate::processor::{
    declared_query, finish, generated_from, refine, Generated, Processed, Processor,
    ProcessorKind,
};
use crate::runner::{execute, Launch, RunContext, Runner};

/// Transforms existing objects and may emit new ones.
///
/// The default `generate` queries `model` filtered by `conditions`, then
/// applies `ordering`, `offset` and `limit` when declared. Overriding
/// `generate` makes the declarations irrelevant; leaving both undeclared
/// fails with [`engine_core::Error::NotImplemented`] when `generate` runs.
#[async_trait::async_trait]
pub trait Step: Processor {
    fn model(&self) -> Option<&'static ModelMeta> {
        None
    }

    /// ANDed together.
    fn conditions(&self) -> Option<Vec<Condition>> {
        None
    }

    fn ordering(&self) -> Option<Vec<Order>> {
        None
    }

    fn offset(&self) -> Option<u64> {
        None
    }

    fn limit(&self) -> Option<u64> {
        None
    }

    /// Query built from the declarations.
    fn query(&self) -> Result<Query> {
        let query = declared_query(Self::name(), self.model(), self.conditions())?;
        Ok(refine(query, self.ordering(), self.offset(), self.limit()))
    }

    async fn generate(&mut self, session: &mut Session) -> Result<Generated> {
        let query = self.query()?;
        Ok(generated_from(session.fetch(&query).await?))
    }

    /// Handles one object. Mutations of `obj` are saved after this returns;
    /// returned objects are validated and saved too.
    async fn process(&mut self, session: &mut Session, obj: &mut dyn Model) -> Result<Processed>;
}

pub(crate) struct StepLauncher<P, F> {
    factory: F,
    _marker: PhantomData<fn() -> P>,
}

impl<P, F> StepLauncher<P, F> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<P, F> Launch for StepLauncher<P, F>
where
    P: Step,
    F: Fn(usize) -> P + Send + Sync + 'static,
{
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Step
    }

    async fn launch(&self, ctx: &RunContext, proc: usize) -> Result<()> {
        let mut session = ctx.store.session().await?;
        let outcome = run_step((self.factory)(proc), &mut session).await;
        let closed = session.close(&outcome).await;
        outcome.and(closed)
    }
}

async fn run_step<P: Step>(mut step: P, session: &mut Session) -> Result<()> {
    step.setup(session).await?;
    let outcome = process_all(&mut step, session).await;
    let torn = step.teardown(session, outcome.as_ref().err()).await;
    finish(outcome, torn)
}

async fn process_all<P: Step>(step: &mut P, session: &mut Session) -> Result<()> {
    let mut objects = step.generate(session).await?;
    while let Some(obj) = objects.next().await {
        let mut obj = obj?;
        metrics().objects_generated.inc();
        step.validate(session, &*obj)?;

        let produced = step.process(session, &mut *obj).await?;
        for new_obj in produced.into_vec() {
            step.validate(session, &*new_obj)?;
            step.save(session, &*new_obj);
        }
        step.save(session, &*obj);
    }
    Ok(())
}

/// Runs the step `target` with `procno` runners (one, inline, when `sync`).
pub async fn execute_step(
    target: &ProcessorDescriptor,
    ctx: &RunContext,
    sync: bool,
) -> Result<Vec<Runner>> {
    execute(ProcessorKind::Step, target, ctx, sync).await
}
