//! Common test setup functions.

use engine_core::{col, Model, Query};
use store::{query, schema, Alerted, Session, StoreClient, StoreConfig, ALERTED_META};
use telemetry::{init_tracing, TracingConfig};
use worker::{Catalog, MemoryBuffer, PipelineSettings, RunContext};

use crate::fixtures::{sample_catalog, sample_settings, SampleModel, SAMPLE_META};
use crate::mocks::{new_log, EventLog};

/// Fresh store with every catalog model's table created.
///
/// The default in-memory store keeps a single connection: a session held by
/// the test blocks runners until it is closed. File stores behave the same
/// through the database write lock.
pub struct TestContext {
    pub catalog: Catalog,
    pub store: StoreClient,
    pub run: RunContext,
    pub alert_output: MemoryBuffer,
    pub log: EventLog,
}

impl TestContext {
    /// The sample catalog with [`sample_settings`].
    pub async fn new() -> Self {
        Self::with_settings(sample_settings()).await
    }

    /// The sample catalog with custom settings.
    pub async fn with_settings(settings: PipelineSettings) -> Self {
        let alert_output = MemoryBuffer::default();
        let log = new_log();
        let catalog =
            sample_catalog(alert_output.clone(), log.clone()).expect("Failed to build catalog");
        Self::from_catalog(catalog, settings, alert_output, log).await
    }

    /// A caller-built catalog; `alert_output` and `log` are whatever it was
    /// wired to.
    pub async fn from_catalog(
        catalog: Catalog,
        settings: PipelineSettings,
        alert_output: MemoryBuffer,
        log: EventLog,
    ) -> Self {
        Self::with_store(StoreConfig::default(), catalog, settings, alert_output, log).await
    }

    /// Like [`TestContext::from_catalog`] over any store, e.g. a file
    /// database with a real connection pool.
    pub async fn with_store(
        config: StoreConfig,
        catalog: Catalog,
        settings: PipelineSettings,
        alert_output: MemoryBuffer,
        log: EventLog,
    ) -> Self {
        init_tracing(&TracingConfig::default().with_filter("warn"));

        let store = StoreClient::connect(config, catalog.models().clone())
            .await
            .expect("Failed to connect to store");
        schema::create_all(&store)
            .await
            .expect("Failed to create tables");

        let run = RunContext::new(store.clone(), settings);
        Self {
            catalog,
            store,
            run,
            alert_output,
            log,
        }
    }

    pub async fn session(&self) -> Session {
        self.store.session().await.expect("Failed to open session")
    }

    /// Saves and commits `objects`.
    pub async fn insert(&self, objects: Vec<Box<dyn Model>>) {
        let mut session = self.session().await;
        for obj in &objects {
            session.add(&**obj);
        }
        session.commit().await.expect("Failed to commit fixtures");
    }

    /// Saves and commits samples with the given names.
    pub async fn insert_named(&self, names: &[&str]) {
        let samples = names
            .iter()
            .map(|name| Box::new(SampleModel::named(*name)) as Box<dyn Model>)
            .collect();
        self.insert(samples).await;
    }

    /// Every sample, by id.
    pub async fn samples(&self) -> Vec<SampleModel> {
        let query = Query::new(&SAMPLE_META).order_by([col("id").asc()]);
        query::fetch_all(&self.store, &query)
            .await
            .expect("Failed to fetch samples")
    }

    /// Sample names, by id.
    pub async fn names(&self) -> Vec<Option<String>> {
        self.samples().await.into_iter().map(|s| s.name).collect()
    }

    /// Every ledger entry, by id.
    pub async fn alerted(&self) -> Vec<Alerted> {
        let query = Query::new(&ALERTED_META).order_by([col("id").asc()]);
        query::fetch_all(&self.store, &query)
            .await
            .expect("Failed to fetch ledger")
    }

    /// Alert output written so far.
    pub fn alert_output(&self) -> String {
        self.alert_output.lock().clone()
    }
}
