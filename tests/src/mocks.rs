//! Recording processors, endpoints and hooks.
//!
//! Everything here appends to a shared [`EventLog`] so tests can assert on
//! the exact order of lifecycle calls.

use std::sync::Arc;

use async_trait::async_trait;
use engine_core::{col, Condition, Error, Model, ModelMeta, Result};
use parking_lot::Mutex;
use store::Session;
use worker::{
    Alert, AlertContext, Endpoint, PipelineSetup, Processed, Processor, RenderAlert, Step,
};

use crate::fixtures::SAMPLE_META;

/// Ordered record of lifecycle events.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    EventLog::default()
}

/// Snapshot of the recorded events.
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

fn outcome(failure: Option<&Error>) -> &'static str {
    if failure.is_some() {
        "failed"
    } else {
        "ok"
    }
}

/// Endpoint recording setup, each notified object and teardown.
pub struct RecordingEndpoint {
    name: &'static str,
    log: EventLog,
}

impl RecordingEndpoint {
    pub fn new(name: &'static str, log: EventLog) -> Self {
        Self { name, log }
    }
}

#[async_trait]
impl Endpoint for RecordingEndpoint {
    async fn setup(&mut self, ctx: &AlertContext) -> Result<()> {
        self.log
            .lock()
            .push(format!("{}:setup {}", self.name, ctx.alert_name));
        Ok(())
    }

    async fn process(&mut self, alert: &dyn RenderAlert, obj: &dyn Model) -> Result<()> {
        let message = alert.render(&*self, obj);
        self.log
            .lock()
            .push(format!("{}:{}", self.name, message.trim_end()));
        Ok(())
    }

    async fn teardown(&mut self, failure: Option<&Error>) -> Result<()> {
        self.log
            .lock()
            .push(format!("{}:teardown {}", self.name, outcome(failure)));
        Ok(())
    }
}

/// Endpoint whose delivery always fails.
pub struct FailingEndpoint {
    log: EventLog,
}

impl FailingEndpoint {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Endpoint for FailingEndpoint {
    async fn process(&mut self, _alert: &dyn RenderAlert, obj: &dyn Model) -> Result<()> {
        self.log.lock().push(format!("failing:{}", obj.label()));
        Err(Error::endpoint("delivery refused"))
    }

    async fn teardown(&mut self, failure: Option<&Error>) -> Result<()> {
        self.log
            .lock()
            .push(format!("failing:teardown {}", outcome(failure)));
        Ok(())
    }
}

/// How a [`RecordingStep`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Setup,
    Process,
    Teardown,
}

/// Step over `recording*` samples that logs its lifecycle per process.
pub struct RecordingStep {
    log: EventLog,
    proc: usize,
    fault: Fault,
}

impl RecordingStep {
    pub fn new(log: EventLog, proc: usize, fault: Fault) -> Self {
        Self { log, proc, fault }
    }

    fn record(&self, event: impl AsRef<str>) {
        self.log
            .lock()
            .push(format!("#{} {}", self.proc, event.as_ref()));
    }
}

#[async_trait]
impl Processor for RecordingStep {
    const PROCNO: usize = 3;
    const PRODUCTION_PROCNO: Option<usize> = Some(2);
    const GROUPS: &'static [&'static str] = &["recording"];

    async fn setup(&mut self, _session: &mut Session) -> Result<()> {
        self.record("setup");
        if self.fault == Fault::Setup {
            return Err(Error::internal("setup refused"));
        }
        Ok(())
    }

    async fn teardown(&mut self, _session: &mut Session, failure: Option<&Error>) -> Result<()> {
        self.record(format!("teardown {}", outcome(failure)));
        if self.fault == Fault::Teardown {
            return Err(Error::internal("teardown refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn model(&self) -> Option<&'static ModelMeta> {
        Some(&SAMPLE_META)
    }

    fn conditions(&self) -> Option<Vec<Condition>> {
        Some(vec![col("name").like("recording%")])
    }

    fn ordering(&self) -> Option<Vec<engine_core::Order>> {
        Some(vec![col("id").asc()])
    }

    async fn process(&mut self, _session: &mut Session, obj: &mut dyn Model) -> Result<Processed> {
        self.record(format!("process {}", obj.label()));
        if self.fault == Fault::Process {
            return Err(Error::internal("process refused"));
        }
        Ok(Processed::None)
    }
}

/// Alert over `watch*` samples notifying recording endpoints, optionally
/// with a failing one between them.
pub struct RecordingAlert {
    log: EventLog,
    failing_endpoint: bool,
}

impl RecordingAlert {
    pub fn new(log: EventLog, failing_endpoint: bool) -> Self {
        Self {
            log,
            failing_endpoint,
        }
    }
}

#[async_trait]
impl Processor for RecordingAlert {
    async fn setup(&mut self, _session: &mut Session) -> Result<()> {
        self.log.lock().push("alert:setup".into());
        Ok(())
    }

    async fn teardown(&mut self, _session: &mut Session, failure: Option<&Error>) -> Result<()> {
        self.log
            .lock()
            .push(format!("alert:teardown {}", outcome(failure)));
        Ok(())
    }
}

#[async_trait]
impl Alert for RecordingAlert {
    fn model(&self) -> Option<&'static ModelMeta> {
        Some(&SAMPLE_META)
    }

    fn conditions(&self) -> Option<Vec<Condition>> {
        Some(vec![col("name").like("watch%")])
    }

    fn ordering(&self) -> Option<Vec<engine_core::Order>> {
        Some(vec![col("id").asc()])
    }

    fn alert_to(&self) -> Vec<Box<dyn Endpoint>> {
        let mut endpoints: Vec<Box<dyn Endpoint>> =
            vec![Box::new(RecordingEndpoint::new("first", self.log.clone()))];
        if self.failing_endpoint {
            endpoints.push(Box::new(FailingEndpoint::new(self.log.clone())));
        }
        endpoints.push(Box::new(RecordingEndpoint::new("second", self.log.clone())));
        endpoints
    }
}

/// Pipeline setup hook recording its calls.
pub struct RecordingSetup {
    log: EventLog,
}

impl RecordingSetup {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl PipelineSetup for RecordingSetup {
    fn setup(&mut self) -> Result<()> {
        self.log.lock().push("pipeline:setup".into());
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.log.lock().push("pipeline:teardown".into());
        Ok(())
    }
}
