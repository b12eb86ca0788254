//! Command line tests against a file database.

use std::path::Path;

use clap::Parser;
use integration_tests::fixtures::{
    sample_catalog, SampleModel, ALERT1_PATH, LOADER_PATH, SETUP_PATH, STEP1_PATH, STEP2_PATH,
};
use integration_tests::mocks::{events, new_log, EventLog};
use pipeline_engine::{run, Cli, USAGE_EXIT_CODE};
use store::{query, StoreClient, StoreConfig};
use worker::{Catalog, MemoryBuffer};

struct Harness {
    _dir: tempfile::TempDir,
    config: String,
    url: String,
    catalog: Catalog,
    output: MemoryBuffer,
    log: EventLog,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("pipeline.db").display());
        let config = dir.path().join("pipeline.toml");
        write_config(&config, &url);

        let output = MemoryBuffer::default();
        let log = new_log();
        let catalog = sample_catalog(output.clone(), log.clone()).unwrap();
        Self {
            config: config.display().to_string(),
            _dir: dir,
            url,
            catalog,
            output,
            log,
        }
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<i32> {
        let mut argv = vec!["pipeline", "--config", self.config.as_str()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        run(cli, &self.catalog).await
    }

    async fn store(&self) -> StoreClient {
        StoreClient::connect(StoreConfig::new(self.url.clone()), self.catalog.models().clone())
            .await
            .unwrap()
    }

    async fn names(&self) -> Vec<Option<String>> {
        let store = self.store().await;
        let query = engine_core::Query::new(&integration_tests::fixtures::SAMPLE_META)
            .order_by([engine_core::col("id").asc()]);
        let samples: Vec<SampleModel> = query::fetch_all(&store, &query).await.unwrap();
        store.close().await;
        samples.into_iter().map(|s| s.name).collect()
    }
}

fn write_config(path: &Path, url: &str) {
    let content = format!(
        r#"
[log]
filter = "warn"

[store]
url = "{url}"

[pipeline]
project_name = "e2e"
loader = "{LOADER_PATH}"
steps = ["{STEP2_PATH}", "{STEP1_PATH}"]
alerts = ["{ALERT1_PATH}"]
pipeline_setup = "{SETUP_PATH}"
"#
    );
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_full_pipeline() {
    let h = Harness::new();

    assert_eq!(h.run(&["createdb"]).await.unwrap(), 0);
    assert_eq!(h.run(&["load", "--sync"]).await.unwrap(), 0);

    let store = h.store().await;
    let mut session = store.session().await.unwrap();
    session.add(&SampleModel::unnamed());
    session.add(&SampleModel::named("catch_alert-x"));
    session.commit().await.unwrap();
    store.close().await;

    assert_eq!(h.run(&["run", "--sync"]).await.unwrap(), 0);
    assert_eq!(
        h.names().await,
        vec![
            Some("foo".to_string()),
            Some("Step2".to_string()),
            Some("catch_alert-x".to_string()),
            Some("Step2-child-2".to_string()),
        ]
    );

    assert_eq!(h.run(&["check-alerts"]).await.unwrap(), 0);
    assert_eq!(h.run(&["check-alerts", "--sync"]).await.unwrap(), 0);
    let output = h.output.lock().clone();
    assert_eq!(output.lines().count(), 1);
    assert!(output.starts_with("[e2e-ALERT @ "));
    assert!(output.ends_with("Check the object 'sample_model(id=3)'\n"));

    let log = events(&h.log);
    assert_eq!(log.len(), 10);
    assert!(log
        .chunks(2)
        .all(|pair| pair == ["pipeline:setup", "pipeline:teardown"]));
}

#[tokio::test]
async fn test_createdb_twice_fails() {
    let h = Harness::new();

    assert_eq!(h.run(&["createdb"]).await.unwrap(), 0);
    assert!(h.run(&["createdb"]).await.is_err());
}

#[tokio::test]
async fn test_selected_steps() {
    let h = Harness::new();
    h.run(&["createdb"]).await.unwrap();
    let store = h.store().await;
    let mut session = store.session().await.unwrap();
    session.add(&SampleModel::unnamed());
    session.commit().await.unwrap();
    store.close().await;

    assert_eq!(h.run(&["run", "--steps", "Step1", "--sync"]).await.unwrap(), 0);
    assert_eq!(h.names().await, vec![Some("Step1".to_string())]);
}

#[tokio::test]
async fn test_invalid_step_names_are_usage_errors() {
    let h = Harness::new();
    h.run(&["createdb"]).await.unwrap();

    assert_eq!(
        h.run(&["run", "--steps", "Missing"]).await.unwrap(),
        USAGE_EXIT_CODE
    );
    assert_eq!(
        h.run(&["run", "--steps", "Step1", "Step1"]).await.unwrap(),
        USAGE_EXIT_CODE
    );
    assert_eq!(
        h.run(&["check-alerts", "--alerts", "Step1"]).await.unwrap(),
        USAGE_EXIT_CODE
    );
}

#[tokio::test]
async fn test_groups_selection() {
    let h = Harness::new();
    h.run(&["createdb"]).await.unwrap();

    assert_eq!(h.run(&["groups"]).await.unwrap(), 0);
    assert_eq!(h.run(&["run", "--groups", "missing"]).await.unwrap(), 0);
    assert_eq!(h.run(&["check-alerts", "--groups", "night"]).await.unwrap(), 0);
}
