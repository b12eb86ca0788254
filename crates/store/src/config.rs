//! Store configuration.

use serde::{Deserialize, Serialize};

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum pooled connections (file databases only)
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Seconds to wait for a free connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Seconds a session waits for the database write lock
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_busy_timeout_secs() -> u64 {
    600
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// In-memory databases live as long as their single connection.
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}
