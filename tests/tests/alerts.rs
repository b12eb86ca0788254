//! Alert tests: endpoint fan-out, the ledger and manual registration.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use engine_core::{col, Condition, Error, Model, ModelMeta, Order, Query, Row};
use integration_tests::fixtures::{
    sample_catalog, sample_settings, SampleModel, ALERT1_PATH, MANUAL_ALERT_PATH, SAMPLE_META,
};
use integration_tests::mocks::{events, new_log, RecordingAlert};
use integration_tests::setup::TestContext;
use store::{Alerted, ALERTED_TABLE};
use worker::{
    execute_alert, filter_auto_registered, Alert, Endpoint, File, MemoryBuffer, Processor,
    ProcessorDescriptor,
};

const RECORDING_PATH: &str = "tests.alerts.Recording";
const ONE_AT_A_TIME_PATH: &str = "tests.alerts.OneAtATime";

/// Reports the oldest not yet reported `queue-*` sample per run.
struct OneAtATime {
    output: MemoryBuffer,
}

impl Processor for OneAtATime {}

#[async_trait]
impl Alert for OneAtATime {
    fn model(&self) -> Option<&'static ModelMeta> {
        Some(&SAMPLE_META)
    }

    fn conditions(&self) -> Option<Vec<Condition>> {
        Some(vec![col("name").like("queue-%")])
    }

    fn ordering(&self) -> Option<Vec<Order>> {
        Some(vec![col("id").asc()])
    }

    fn limit(&self) -> Option<u64> {
        Some(1)
    }

    fn alert_to(&self) -> Vec<Box<dyn Endpoint>> {
        vec![Box::new(File::in_memory(self.output.clone()))]
    }
}

async fn recording_context(failing_endpoint: bool) -> (TestContext, ProcessorDescriptor) {
    let output = MemoryBuffer::default();
    let log = new_log();
    let mut catalog = sample_catalog(output.clone(), log.clone()).unwrap();
    let alert_log = log.clone();
    catalog
        .register_alert(RECORDING_PATH, move |_| {
            RecordingAlert::new(alert_log.clone(), failing_endpoint)
        })
        .unwrap();

    let ctx = TestContext::from_catalog(catalog, sample_settings(), output, log).await;
    let alert = ctx.catalog.get(RECORDING_PATH).unwrap().clone();
    (ctx, alert)
}

#[tokio::test]
async fn test_alert_writes_message() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["catch_alert"]).await;
    let alert = ctx.catalog.get(ALERT1_PATH).unwrap();

    execute_alert(alert, &ctx.run, true).await.unwrap();

    let output = ctx.alert_output();
    let line = output.strip_suffix('\n').unwrap();
    let rest = line.strip_prefix("[test-ALERT @ ").unwrap();
    let (timestamp, tail) = rest.split_once(']').unwrap();
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
    assert_eq!(tail, " Check the object 'sample_model(id=1)'");
}

#[tokio::test]
async fn test_alert_notifies_each_object_once() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["catch_alert-1", "other"]).await;
    let alert = ctx.catalog.get(ALERT1_PATH).unwrap();

    execute_alert(alert, &ctx.run, true).await.unwrap();
    execute_alert(alert, &ctx.run, true).await.unwrap();
    assert_eq!(ctx.alert_output().lines().count(), 1);

    ctx.insert_named(&["catch_alert-3"]).await;
    execute_alert(alert, &ctx.run, true).await.unwrap();

    let output = ctx.alert_output();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("'sample_model(id=1)'"));
    assert!(lines[1].ends_with("'sample_model(id=3)'"));

    let ledger = ctx.alerted().await;
    assert_eq!(ledger.len(), 2);
    assert!(ledger.iter().all(|e| e.alert_path() == ALERT1_PATH));
    assert!(ledger.iter().all(|e| e.model_table == "sample_model"));
    assert_eq!(ledger[0].model_ids, Row::new().with("id", 1));
    assert_eq!(ledger[1].model_ids, Row::new().with("id", 3));
}

#[tokio::test]
async fn test_ledger_resolves_alerted_object() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["catch_alert"]).await;
    let alert = ctx.catalog.get(ALERT1_PATH).unwrap();
    execute_alert(alert, &ctx.run, true).await.unwrap();

    let entry = ctx.alerted().await.remove(0);
    let mut session = ctx.session().await;
    let obj = entry.resolve_model(&mut session).await.unwrap().unwrap();
    session.rollback().await.unwrap();

    let sample = obj.downcast_ref::<SampleModel>().unwrap();
    assert_eq!(sample.name.as_deref(), Some("catch_alert"));
}

#[tokio::test]
async fn test_filter_auto_registered() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["a", "b", "c"]).await;
    let samples = ctx.samples().await;

    let mut session = ctx.session().await;
    session.add(&Alerted::for_object("alerts.Seen", &samples[0], Utc::now()));
    session.add(&Alerted::for_object("alerts.Seen", &samples[2], Utc::now()));
    session.add(&Alerted::for_object("alerts.Other", &samples[1], Utc::now()));

    let query = filter_auto_registered(&mut session, "alerts.Seen", Query::new(&SAMPLE_META))
        .await
        .unwrap();
    let remaining = session.fetch_as::<SampleModel>(&query).await.unwrap();
    let untouched = filter_auto_registered(&mut session, "alerts.Never", Query::new(&SAMPLE_META))
        .await
        .unwrap();
    let all = session.count(&untouched).await.unwrap();
    session.rollback().await.unwrap();

    assert_eq!(remaining, vec![samples[1].clone()]);
    assert_eq!(all, 3);
}

#[tokio::test]
async fn test_endpoint_order_and_lifecycle() {
    let (ctx, alert) = recording_context(false).await;
    ctx.insert_named(&["watch-1"]).await;

    execute_alert(&alert, &ctx.run, true).await.unwrap();

    let events = events(&ctx.log);
    assert_eq!(events.len(), 8, "{:#?}", events);
    assert_eq!(events[0], "first:setup RecordingAlert");
    assert_eq!(events[1], "second:setup RecordingAlert");
    assert_eq!(events[2], "alert:setup");
    assert!(events[3].starts_with("first:[test-ALERT @ "));
    assert!(events[4].starts_with("second:[test-ALERT @ "));
    assert!(events[4].ends_with("Check the object 'sample_model(id=1)'"));
    assert_eq!(
        &events[5..],
        ["alert:teardown ok", "first:teardown ok", "second:teardown ok"]
    );
    assert_eq!(ctx.alerted().await.len(), 1);
}

#[tokio::test]
async fn test_endpoint_failure_aborts_registration() {
    let (ctx, alert) = recording_context(true).await;
    ctx.insert_named(&["watch-1", "watch-2"]).await;

    let err = execute_alert(&alert, &ctx.run, true).await.unwrap_err();
    assert!(matches!(err, Error::Endpoint(_)), "got {:?}", err);

    let events = events(&ctx.log);
    assert!(events.iter().any(|e| e == "failing:sample_model(id=1)"));
    assert!(!events.iter().any(|e| e.starts_with("second:[")));
    assert!(!events.iter().any(|e| e.contains("id=2")));
    assert_eq!(
        &events[events.len() - 4..],
        [
            "alert:teardown failed",
            "first:teardown failed",
            "failing:teardown failed",
            "second:teardown failed",
        ]
    );
    assert!(ctx.alerted().await.is_empty());
}

#[tokio::test]
async fn test_manual_registration() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["manual-1", "other"]).await;
    let alert = ctx.catalog.get(MANUAL_ALERT_PATH).unwrap();

    execute_alert(alert, &ctx.run, true).await.unwrap();
    execute_alert(alert, &ctx.run, true).await.unwrap();

    assert_eq!(ctx.alert_output().lines().count(), 1);
    assert_eq!(
        ctx.names().await,
        vec![Some("manual-1-done".to_string()), Some("other".to_string())]
    );
    assert!(ctx.alerted().await.is_empty());
}

#[tokio::test]
async fn test_ledger_table_is_registered() {
    let ctx = TestContext::new().await;
    assert!(ctx.store.models().get(ALERTED_TABLE).is_some());

    let sample = SampleModel {
        id: Some(7),
        name: None,
    };
    let entry = Alerted::for_object(ALERT1_PATH, &sample, Utc::now());
    let obj: &dyn Model = &entry;
    assert_eq!(obj.table(), ALERTED_TABLE);
    assert_eq!(entry.model_ids, Row::new().with("id", 7));
}

#[tokio::test]
async fn test_window_applies_after_ledger_exclusion() {
    let output = MemoryBuffer::default();
    let log = new_log();
    let mut catalog = sample_catalog(output.clone(), log.clone()).unwrap();
    let alert_output = output.clone();
    catalog
        .register_alert(ONE_AT_A_TIME_PATH, move |_| OneAtATime {
            output: alert_output.clone(),
        })
        .unwrap();
    let ctx = TestContext::from_catalog(catalog, sample_settings(), output, log).await;
    ctx.insert_named(&["queue-a", "queue-b", "queue-c"]).await;
    let alert = ctx.catalog.get(ONE_AT_A_TIME_PATH).unwrap();

    for _ in 0..4 {
        execute_alert(alert, &ctx.run, true).await.unwrap();
    }

    let output = ctx.alert_output();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 3);
    for (line, id) in lines.iter().zip(1..) {
        assert!(
            line.ends_with(&format!("'sample_model(id={})'", id)),
            "{}",
            line
        );
    }

    let ledger = ctx.alerted().await;
    assert_eq!(ledger.len(), 3);
    assert!(ledger.iter().all(|e| e.alert_path() == ONE_AT_A_TIME_PATH));
}
