//! Registration and settings-driven lookup of processors.
//!
//! Every loader, step, alert and pipeline setup hook is registered under a
//! path (e.g. `"pipeline.steps.Calibrate"`). Settings refer to those paths;
//! resolving an unknown path fails with an import error and a path of the
//! wrong kind with an improper-configuration error, both before any runner
//! is created.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use engine_core::{Entity, Error, Result};
use store::ModelRegistry;
use tracing::debug;

use crate::alert::{Alert, AlertLauncher};
use crate::loader::{Loader, LoaderLauncher};
use crate::pipeline::{DefaultSetup, PipelineSetup};
use crate::processor::{resolve_procno, Processor, ProcessorKind};
use crate::runner::Launch;
use crate::settings::PipelineSettings;
use crate::step::{Step, StepLauncher};

/// A registered processor type.
#[derive(Clone)]
pub struct ProcessorDescriptor {
    path: String,
    name: &'static str,
    kind: ProcessorKind,
    procno: fn(bool) -> usize,
    groups: &'static [&'static str],
    class_setup: fn() -> Result<()>,
    launcher: Arc<dyn Launch>,
}

impl ProcessorDescriptor {
    pub fn new<P: Processor>(path: impl Into<String>, launcher: Arc<dyn Launch>) -> Self {
        Self {
            path: path.into(),
            name: P::name(),
            kind: launcher.kind(),
            procno: resolve_procno::<P>,
            groups: P::GROUPS,
            class_setup: P::class_setup,
            launcher,
        }
    }

    /// Path the processor is registered under.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ProcessorKind {
        self.kind
    }

    pub fn groups(&self) -> &'static [&'static str] {
        self.groups
    }

    /// Shares at least one group with `groups`.
    pub fn in_groups(&self, groups: &[String]) -> bool {
        self.groups.iter().any(|g| groups.iter().any(|w| w == g))
    }

    /// Runners to start for one execution.
    pub fn procno(&self, debug_process: bool) -> usize {
        (self.procno)(debug_process)
    }

    pub fn class_setup(&self) -> Result<()> {
        (self.class_setup)()
    }

    pub(crate) fn launcher(&self) -> &Arc<dyn Launch> {
        &self.launcher
    }
}

impl fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("procno", &self.procno(true))
            .field("production_procno", &self.procno(false))
            .field("groups", &self.groups)
            .finish()
    }
}

type SetupFactory = Arc<dyn Fn() -> Box<dyn PipelineSetup> + Send + Sync>;

/// Models, processors and setup hooks available to a pipeline.
#[derive(Clone, Default)]
pub struct Catalog {
    models: ModelRegistry,
    processors: BTreeMap<String, ProcessorDescriptor>,
    setups: BTreeMap<String, SetupFactory>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<T: Entity>(&mut self) -> Result<&mut Self> {
        self.models.register_entity::<T>()?;
        Ok(self)
    }

    /// `factory` builds one loader per process index.
    pub fn register_loader<P, F>(&mut self, path: &str, factory: F) -> Result<&mut Self>
    where
        P: Loader,
        F: Fn(usize) -> P + Send + Sync + 'static,
    {
        let launcher = Arc::new(LoaderLauncher::new(factory));
        self.insert(ProcessorDescriptor::new::<P>(path, launcher))
    }

    pub fn register_step<P, F>(&mut self, path: &str, factory: F) -> Result<&mut Self>
    where
        P: Step,
        F: Fn(usize) -> P + Send + Sync + 'static,
    {
        let launcher = Arc::new(StepLauncher::new(factory));
        self.insert(ProcessorDescriptor::new::<P>(path, launcher))
    }

    pub fn register_alert<P, F>(&mut self, path: &str, factory: F) -> Result<&mut Self>
    where
        P: Alert,
        F: Fn(usize) -> P + Send + Sync + 'static,
    {
        let launcher = Arc::new(AlertLauncher::new(path, factory));
        self.insert(ProcessorDescriptor::new::<P>(path, launcher))
    }

    pub fn register_setup<S, F>(&mut self, path: &str, factory: F) -> Result<&mut Self>
    where
        S: PipelineSetup + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        if self.setups.contains_key(path) {
            return Err(Error::improperly_configured(format!(
                "Pipeline setup '{}' is already registered",
                path
            )));
        }
        let factory: SetupFactory = Arc::new(move || Box::new(factory()) as Box<dyn PipelineSetup>);
        self.setups.insert(path.to_string(), factory);
        Ok(self)
    }

    fn insert(&mut self, descriptor: ProcessorDescriptor) -> Result<&mut Self> {
        if self.processors.contains_key(descriptor.path()) {
            return Err(Error::improperly_configured(format!(
                "'{}' is already registered",
                descriptor.path()
            )));
        }
        self.processors
            .insert(descriptor.path().to_string(), descriptor);
        Ok(self)
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Resolves a registered path.
    pub fn get(&self, path: &str) -> Result<&ProcessorDescriptor> {
        self.processors
            .get(path)
            .ok_or_else(|| Error::import(format!("No processor registered as '{}'", path)))
    }

    fn resolve(&self, setting: &str, path: &str, kind: ProcessorKind) -> Result<ProcessorDescriptor> {
        let descriptor = self.get(path)?;
        if descriptor.kind() != kind {
            return Err(Error::improperly_configured(format!(
                "{} '{}' must be a {}, found a {}",
                setting,
                path,
                kind,
                descriptor.kind()
            )));
        }
        Ok(descriptor.clone())
    }

    /// The configured loader.
    pub fn load_loader(&self, settings: &PipelineSettings) -> Result<ProcessorDescriptor> {
        debug!("Loading loader");
        let path = settings
            .loader
            .as_deref()
            .ok_or_else(|| Error::improperly_configured("LOADER is not configured"))?;
        self.resolve("LOADER", path, ProcessorKind::Loader)
    }

    /// Configured steps in any of `groups` (all when `None`), sorted by name.
    pub fn load_steps(
        &self,
        settings: &PipelineSettings,
        groups: Option<&[String]>,
    ) -> Result<Vec<ProcessorDescriptor>> {
        debug!("Loading steps");
        self.load_many("STEP", &settings.steps, ProcessorKind::Step, groups)
    }

    /// Configured alerts in any of `groups` (all when `None`), sorted by name.
    pub fn load_alerts(
        &self,
        settings: &PipelineSettings,
        groups: Option<&[String]>,
    ) -> Result<Vec<ProcessorDescriptor>> {
        debug!("Loading alerts");
        self.load_many("ALERT", &settings.alerts, ProcessorKind::Alert, groups)
    }

    fn load_many(
        &self,
        setting: &str,
        paths: &[String],
        kind: ProcessorKind,
        groups: Option<&[String]>,
    ) -> Result<Vec<ProcessorDescriptor>> {
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let descriptor = self.resolve(setting, path, kind)?;
            if groups.map_or(true, |g| descriptor.in_groups(g)) {
                loaded.push(descriptor);
            }
        }
        loaded.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(loaded)
    }

    /// Sorted union of the configured steps' groups.
    pub fn steps_groups(&self, settings: &PipelineSettings) -> Result<Vec<String>> {
        Ok(union_groups(&self.load_steps(settings, None)?))
    }

    /// Sorted union of the configured alerts' groups.
    pub fn alerts_groups(&self, settings: &PipelineSettings) -> Result<Vec<String>> {
        Ok(union_groups(&self.load_alerts(settings, None)?))
    }

    /// The configured setup hook, or a no-op one.
    pub fn load_pipeline_setup(&self, settings: &PipelineSettings) -> Result<Box<dyn PipelineSetup>> {
        match settings.pipeline_setup.as_deref() {
            None => Ok(Box::new(DefaultSetup)),
            Some(path) => {
                let factory = self.setups.get(path).ok_or_else(|| {
                    Error::import(format!("No pipeline setup registered as '{}'", path))
                })?;
                Ok(factory())
            }
        }
    }
}

fn union_groups(descriptors: &[ProcessorDescriptor]) -> Vec<String> {
    descriptors
        .iter()
        .flat_map(|d| d.groups().iter().map(|g| g.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
