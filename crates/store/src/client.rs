//! SQLite pool wrapper.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use engine_core::{DbErrorCode, Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::registry::ModelRegistry;
use crate::session::Session;

/// Connection pool plus the models it can persist.
#[derive(Clone)]
pub struct StoreClient {
    pool: SqlitePool,
    models: Arc<ModelRegistry>,
    config: StoreConfig,
}

impl StoreClient {
    /// Opens the pool. File databases are created when missing.
    pub async fn connect(config: StoreConfig, models: ModelRegistry) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::database(DbErrorCode::ConnectFailed, e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        // Each connection to `:memory:` is its own database: keep exactly one alive.
        pool_options = if config.is_memory() {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.pool_size.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| Error::database(DbErrorCode::ConnectFailed, e.to_string()))?;

        info!(
            url = %config.url,
            models = models.len(),
            "Connected to store"
        );

        Ok(Self {
            pool,
            models: Arc::new(models),
            config,
        })
    }

    /// Begins a transactional session.
    ///
    /// The write lock is taken up front: concurrent sessions on a file
    /// database queue for up to `busy_timeout_secs` instead of failing when
    /// a deferred reader tries to become a writer.
    pub async fn session(&self) -> Result<Session> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| Error::database(DbErrorCode::ConnectFailed, e.to_string()))?;
        debug!("Session opened");
        Ok(Session::new(tx, self.models.clone()))
    }

    /// Round-trips a trivial statement.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}
