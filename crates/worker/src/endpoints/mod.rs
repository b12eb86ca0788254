//! Alert delivery targets.

mod email;
mod file;

pub use email::Email;
pub use file::{File, MemoryBuffer, MEMORY};

use engine_core::{AsAny, Error, Model, Result};

use crate::settings::EmailSettings;

/// Identity of the alert an endpoint works for.
#[derive(Debug, Clone)]
pub struct AlertContext {
    /// Path the alert is registered under
    pub alert_path: String,
    /// Short type name of the alert
    pub alert_name: String,
    pub project_name: String,
    pub email: EmailSettings,
}

/// Message rendering offered by the alert to its endpoints.
pub trait RenderAlert: Send + Sync {
    fn context(&self) -> &AlertContext;

    fn render(&self, endpoint: &dyn Endpoint, obj: &dyn Model) -> String;
}

/// A place alert notifications are delivered to.
///
/// `setup` runs before the alert's own setup; `teardown` runs after the
/// alert's teardown and receives the failure, if any. Errors from any of the
/// three abort the alert's runner.
#[async_trait::async_trait]
pub trait Endpoint: AsAny + Send + Sync {
    async fn setup(&mut self, _ctx: &AlertContext) -> Result<()> {
        Ok(())
    }

    async fn process(&mut self, alert: &dyn RenderAlert, obj: &dyn Model) -> Result<()>;

    async fn teardown(&mut self, _failure: Option<&Error>) -> Result<()> {
        Ok(())
    }
}
