//! Alerts notify endpoints about objects matching a query, once per object.
//!
//! With `AUTO_REGISTER` (the default) the ledger remembers which objects an
//! alert already reported: `generate` excludes them and `process` writes a new
//! ledger row after every endpoint succeeded. Without it, `filter_registered`
//! and `register` must be provided by the alert.
//!
//! Exclusion and registration share the runner's session and take no lock, so
//! two runners of the same alert over overlapping rows can both notify before
//! either commits.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use engine_core::{col, Condition, Error, Model, ModelMeta, Order, Query, Result, Value};
use futures::StreamExt;
use store::{Alerted, Session, ALERTED_TABLE};
use telemetry::metrics;

use crate::catalog::ProcessorDescriptor;
use crate::endpoints::{AlertContext, Endpoint, RenderAlert};
use crate::processor::{
    declared_query, finish, generated_from, refine, short_type_name, Generated, Processed,
    Processor, ProcessorKind,
};
use crate::runner::{execute, Launch, RunContext, Runner};

#[async_trait::async_trait]
pub trait Alert: Processor {
    /// Track notified objects in the ledger.
    const AUTO_REGISTER: bool = true;

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

    /// Endpoints notified for every object, in order. Called once per runner.
    fn alert_to(&self) -> Vec<Box<dyn Endpoint>>;

    /// Declared query minus already notified objects, then ordered and windowed.
    async fn generate(&mut self, session: &mut Session, ctx: &AlertContext) -> Result<Generated> {
        let query = declared_query(Self::name(), self.model(), self.conditions())?;
        let query = if Self::AUTO_REGISTER {
            filter_auto_registered(session, &ctx.alert_path, query).await?
        } else {
            self.filter_registered(session, query).await?
        };
        let query = refine(query, self.ordering(), self.offset(), self.limit());
        Ok(generated_from(session.fetch(&query).await?))
    }

    /// Manual de-duplication filter, used when `AUTO_REGISTER` is off.
    async fn filter_registered(&mut self, _session: &mut Session, _query: Query) -> Result<Query> {
        Err(Error::not_implemented(format!(
            "'{}' must implement 'filter_registered' when auto registration is off",
            Self::name()
        )))
    }

    /// Manual registration, used when `AUTO_REGISTER` is off. Returned
    /// objects are validated and saved.
    async fn register(&mut self, _session: &mut Session, _obj: &dyn Model) -> Result<Processed> {
        Err(Error::not_implemented(format!(
            "'{}' must implement 'register' when auto registration is off",
            Self::name()
        )))
    }

    /// Notifies every endpoint, then registers the object. The first endpoint
    /// failure aborts the remaining endpoints and the registration.
    async fn process(
        &mut self,
        session: &mut Session,
        ctx: &AlertContext,
        endpoints: &mut [Box<dyn Endpoint>],
        obj: &dyn Model,
    ) -> Result<Processed> {
        {
            let view = AlertView { alert: &*self, ctx };
            for endpoint in endpoints.iter_mut() {
                if let Err(e) = endpoint.process(&view, obj).await {
                    metrics().endpoint_errors.inc();
                    return Err(e);
                }
                metrics().notifications_sent.inc();
            }
        }
        if Self::AUTO_REGISTER {
            Ok(Processed::one(Alerted::for_object(
                ctx.alert_path.clone(),
                obj,
                Utc::now(),
            )))
        } else {
            self.register(session, obj).await
        }
    }

    /// Message for one object; `endpoint` is the endpoint asking.
    fn render_alert(
        &self,
        ctx: &AlertContext,
        utcnow: DateTime<Utc>,
        _endpoint: &dyn Endpoint,
        obj: &dyn Model,
    ) -> String {
        format!(
            "[{}-ALERT @ {}] Check the object '{}'\n",
            ctx.project_name,
            utcnow.format("%Y-%m-%dT%H:%M:%S%.6f"),
            obj.label()
        )
    }
}

struct AlertView<'a, A> {
    alert: &'a A,
    ctx: &'a AlertContext,
}

impl<A: Alert> RenderAlert for AlertView<'_, A> {
    fn context(&self) -> &AlertContext {
        self.ctx
    }

    fn render(&self, endpoint: &dyn Endpoint, obj: &dyn Model) -> String {
        self.alert.render_alert(self.ctx, Utc::now(), endpoint, obj)
    }
}

/// Excludes objects of `query`'s table already registered by `alert_path`.
///
/// Remembered key values are grouped per key column and the query keeps only
/// rows for which not every key column matches a remembered value.
pub async fn filter_auto_registered(
    session: &mut Session,
    alert_path: &str,
    query: Query,
) -> Result<Query> {
    let entries = Alerted::registered(session, alert_path, query.meta().table).await?;
    if entries.is_empty() {
        return Ok(query);
    }

    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for entry in &entries {
        for (column, value) in entry.model_ids.iter() {
            let values = grouped.entry(column.clone()).or_default();
            if !values.contains(value) {
                values.push(value.clone());
            }
        }
    }

    let exclude = grouped
        .into_iter()
        .map(|(column, values)| col(column).in_(values));
    Ok(query.filter([!Condition::and(exclude)]))
}

pub(crate) struct AlertLauncher<P, F> {
    path: String,
    factory: F,
    _marker: PhantomData<fn() -> P>,
}

impl<P, F> AlertLauncher<P, F> {
    pub(crate) fn new(path: &str, factory: F) -> Self {
        Self {
            path: path.to_string(),
            factory,
            _marker: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<P, F> Launch for AlertLauncher<P, F>
where
    P: Alert,
    F: Fn(usize) -> P + Send + Sync + 'static,
{
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Alert
    }

    async fn launch(&self, ctx: &RunContext, proc: usize) -> Result<()> {
        let alert_ctx = AlertContext {
            alert_path: self.path.clone(),
            alert_name: short_type_name::<P>().to_string(),
            project_name: ctx.settings.project_name.clone(),
            email: ctx.settings.email.clone(),
        };
        let mut session = ctx.store.session().await?;
        let outcome = run_alert((self.factory)(proc), &alert_ctx, &mut session).await;
        let closed = session.close(&outcome).await;
        outcome.and(closed)
    }
}

async fn run_alert<P: Alert>(mut alert: P, ctx: &AlertContext, session: &mut Session) -> Result<()> {
    let mut endpoints = alert.alert_to();
    for endpoint in endpoints.iter_mut() {
        endpoint.setup(ctx).await?;
    }
    alert.setup(session).await?;

    let outcome = notify_all(&mut alert, ctx, &mut endpoints, session).await;
    let failure = outcome.as_ref().err();

    let mut torn = alert.teardown(session, failure).await;
    for endpoint in endpoints.iter_mut() {
        let result = endpoint.teardown(failure).await;
        if torn.is_ok() {
            torn = result;
        }
    }
    finish(outcome, torn)
}

async fn notify_all<P: Alert>(
    alert: &mut P,
    ctx: &AlertContext,
    endpoints: &mut [Box<dyn Endpoint>],
    session: &mut Session,
) -> Result<()> {
    let mut objects = alert.generate(session, ctx).await?;
    while let Some(obj) = objects.next().await {
        let obj = obj?;
        metrics().objects_generated.inc();
        alert.validate(session, &*obj)?;

        let produced = alert.process(session, ctx, endpoints, &*obj).await?;
        for new_obj in produced.into_vec() {
            alert.validate(session, &*new_obj)?;
            alert.save(session, &*new_obj);
            if new_obj.table() == ALERTED_TABLE {
                metrics().alerts_registered.inc();
            }
        }
    }
    Ok(())
}

/// Runs the alert `target` with `procno` runners (one, inline, when `sync`).
pub async fn execute_alert(
    target: &ProcessorDescriptor,
    ctx: &RunContext,
    sync: bool,
) -> Result<Vec<Runner>> {
    execute(ProcessorKind::Alert, target, ctx, sync).await
}
