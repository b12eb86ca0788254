//! Behaviour shared by loaders, steps and alerts.

use std::fmt;

use engine_core::{Condition, Error, Model, ModelMeta, Order, Query, Result};
use futures::stream::{self, BoxStream, StreamExt};
use store::Session;
use telemetry::metrics;

/// Objects produced by `generate`.
pub type Generated = BoxStream<'static, Result<Box<dyn Model>>>;

/// Wraps already materialized objects.
pub fn generated_from<I>(objects: I) -> Generated
where
    I: IntoIterator<Item = Box<dyn Model>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(objects.into_iter().map(Ok)).boxed()
}

/// Generates nothing.
pub fn nothing() -> Generated {
    stream::empty().boxed()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Loader,
    Step,
    Alert,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loader => write!(f, "loader"),
            Self::Step => write!(f, "step"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

/// Identity, lifecycle hooks and persistence helpers of every processor.
///
/// One instance is built per runner with its 0-based process index and lives
/// for one setup/generate/teardown cycle inside a single session.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + Sized + 'static {
    /// Process count while `debug_process` is on.
    const PROCNO: usize = 1;
    /// Process count once `debug_process` is off; falls back to `PROCNO`.
    const PRODUCTION_PROCNO: Option<usize> = None;
    const GROUPS: &'static [&'static str] = &["default"];

    /// Short type name.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Runs once per execution call, before any runner is created.
    fn class_setup() -> Result<()> {
        Ok(())
    }

    async fn setup(&mut self, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Always runs after a successful `setup`, receiving the failure if the
    /// cycle failed.
    async fn teardown(&mut self, _session: &mut Session, _failure: Option<&Error>) -> Result<()> {
        Ok(())
    }

    /// Fails with a type error unless `obj` belongs to a registered model.
    fn validate(&self, session: &Session, obj: &dyn Model) -> Result<()> {
        session.models().validate(obj)
    }

    /// Stages `obj` for insert or update; unregistered objects are ignored.
    fn save(&self, session: &mut Session, obj: &dyn Model) {
        if session.models().contains(obj.meta()) {
            session.add(obj);
            metrics().objects_saved.inc();
        }
    }

    /// Stages `obj` for deletion; unregistered objects are ignored.
    fn delete(&self, session: &mut Session, obj: &dyn Model) {
        if session.models().contains(obj.meta()) {
            session.delete(obj);
            metrics().objects_deleted.inc();
        }
    }
}

/// Effective process count of `P`.
pub fn resolve_procno<P: Processor>(debug_process: bool) -> usize {
    if debug_process {
        P::PROCNO
    } else {
        P::PRODUCTION_PROCNO.unwrap_or(P::PROCNO)
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Normalized result of `process`.
#[derive(Debug, Default)]
pub enum Processed {
    #[default]
    None,
    One(Box<dyn Model>),
    Many(Vec<Box<dyn Model>>),
}

impl Processed {
    pub fn one(obj: impl Model) -> Self {
        Self::One(Box::new(obj))
    }

    pub fn into_vec(self) -> Vec<Box<dyn Model>> {
        match self {
            Self::None => Vec::new(),
            Self::One(obj) => vec![obj],
            Self::Many(objs) => objs,
        }
    }
}

impl From<()> for Processed {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Box<dyn Model>> for Processed {
    fn from(obj: Box<dyn Model>) -> Self {
        Self::One(obj)
    }
}

impl From<Option<Box<dyn Model>>> for Processed {
    fn from(obj: Option<Box<dyn Model>>) -> Self {
        obj.map_or(Self::None, Self::One)
    }
}

impl From<Vec<Box<dyn Model>>> for Processed {
    fn from(objs: Vec<Box<dyn Model>>) -> Self {
        Self::Many(objs)
    }
}

/// `model` filtered by `conditions`; both must be declared.
pub(crate) fn declared_query(
    name: &str,
    model: Option<&'static ModelMeta>,
    conditions: Option<Vec<Condition>>,
) -> Result<Query> {
    match (model, conditions) {
        (Some(model), Some(conditions)) => Ok(Query::new(model).filter(conditions)),
        _ => Err(Error::not_implemented(format!(
            "'{}' with a default generate must declare 'model' and 'conditions'",
            name
        ))),
    }
}

/// Applies ordering, then offset, then limit, each only when declared.
pub(crate) fn refine(
    mut query: Query,
    ordering: Option<Vec<Order>>,
    offset: Option<u64>,
    limit: Option<u64>,
) -> Query {
    if let Some(ordering) = ordering {
        query = query.order_by(ordering);
    }
    if let Some(offset) = offset {
        query = query.offset(offset);
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    query
}

/// Keeps the first error: a cycle failure wins over a teardown failure.
pub(crate) fn finish(outcome: Result<()>, teardown: Result<()>) -> Result<()> {
    match outcome {
        Err(e) => {
            if let Err(t) = teardown {
                tracing::warn!(error = %t, "Teardown failed after an earlier error");
            }
            Err(e)
        }
        Ok(()) => teardown,
    }
}
