//! Pipeline settings.

use serde::{Deserialize, Serialize};

/// SMTP settings used by email endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    /// `host` or `host:port`
    #[serde(default)]
    pub server: Option<String>,
    /// Upgrade the connection with STARTTLS
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_tls() -> bool {
    true
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            server: None,
            tls: default_tls(),
            user: None,
            password: None,
        }
    }
}

impl EmailSettings {
    /// Host part of `server`.
    pub fn host(&self) -> Option<&str> {
        self.server
            .as_deref()
            .map(|s| s.split_once(':').map_or(s, |(host, _)| host))
    }

    /// Port part of `server`, when present and numeric.
    pub fn port(&self) -> Option<u16> {
        self.server
            .as_deref()
            .and_then(|s| s.split_once(':'))
            .and_then(|(_, port)| port.parse().ok())
    }
}

/// Which processors make up the pipeline and how they run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Name used in alert messages
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Use `PROCNO` (true) or `PRODUCTION_PROCNO` (false)
    #[serde(default = "default_debug_process")]
    pub debug_process: bool,
    /// Registered path of the loader
    #[serde(default)]
    pub loader: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub alerts: Vec<String>,
    /// Registered path of the pipeline setup hook
    #[serde(default)]
    pub pipeline_setup: Option<String>,
    #[serde(default)]
    pub email: EmailSettings,
}

fn default_project_name() -> String {
    "pipeline".to_string()
}

fn default_debug_process() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            debug_process: default_debug_process(),
            loader: None,
            steps: Vec::new(),
            alerts: Vec::new(),
            pipeline_setup: None,
            email: EmailSettings::default(),
        }
    }
}
