//! Session semantics against an in-memory store.

use engine_core::{col, Error, Query, Row};
use integration_tests::fixtures::{SampleModel, UnmappedModel, SAMPLE_META};
use integration_tests::setup::TestContext;
use store::{query, schema, Alerted, ALERTED_META};

fn named(id: i64, name: &str) -> SampleModel {
    SampleModel {
        id: Some(id),
        name: Some(name.into()),
    }
}

#[tokio::test]
async fn test_reads_see_staged_changes() {
    let ctx = TestContext::new().await;
    let mut session = ctx.session().await;

    session.add(&SampleModel::named("staged"));
    assert_eq!(session.pending(), 1);

    let query = Query::new(&SAMPLE_META).filter([col("name").eq("staged")]);
    assert_eq!(session.count(&query).await.unwrap(), 1);
    assert_eq!(session.pending(), 0);
    session.rollback().await.unwrap();

    assert!(ctx.samples().await.is_empty());
}

#[tokio::test]
async fn test_keyed_save_updates_in_place() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["before"]).await;

    let mut session = ctx.session().await;
    session.add(&named(1, "after"));
    session.commit().await.unwrap();

    assert_eq!(ctx.samples().await, vec![named(1, "after")]);
}

#[tokio::test]
async fn test_delete_and_get() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["a", "b"]).await;

    let mut session = ctx.session().await;
    session.delete(&named(1, "a"));
    session.delete(&SampleModel::unnamed());
    let gone = session
        .get(&SAMPLE_META, &Row::new().with("id", 1))
        .await
        .unwrap();
    let kept = session
        .get(&SAMPLE_META, &Row::new().with("id", 2))
        .await
        .unwrap()
        .unwrap();
    session.commit().await.unwrap();

    assert!(gone.is_none());
    assert_eq!(kept.downcast_ref::<SampleModel>(), Some(&named(2, "b")));
    assert_eq!(ctx.names().await, vec![Some("b".to_string())]);
}

#[tokio::test]
async fn test_close_follows_outcome() {
    let ctx = TestContext::new().await;

    let mut failed = ctx.session().await;
    failed.add(&SampleModel::named("dropped"));
    failed.flush().await.unwrap();
    let outcome: engine_core::Result<()> = Err(Error::internal("boom"));
    failed.close(&outcome).await.unwrap();
    assert!(ctx.samples().await.is_empty());

    let mut succeeded = ctx.session().await;
    succeeded.add(&SampleModel::named("kept"));
    succeeded.close(&Ok(())).await.unwrap();
    assert_eq!(ctx.names().await, vec![Some("kept".to_string())]);
}

#[tokio::test]
async fn test_constraint_violation_on_flush() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["same"]).await;

    let mut session = ctx.session().await;
    session.add(&SampleModel::named("same"));
    let err = session.flush().await.unwrap_err();
    session.rollback().await.unwrap();

    assert_eq!(err.error_code(), Some("DB_003"));
}

#[tokio::test]
async fn test_unregistered_model_is_rejected() {
    let ctx = TestContext::new().await;
    let session = ctx.session().await;

    let err = session
        .models()
        .validate(&UnmappedModel { id: 1 })
        .unwrap_err();
    session.rollback().await.unwrap();

    assert!(matches!(err, Error::Type(_)));
}

#[tokio::test]
async fn test_create_all_refuses_existing_tables() {
    let ctx = TestContext::new().await;

    let err = schema::create_all(&ctx.store).await.unwrap_err();
    assert!(matches!(err, Error::ImproperlyConfigured(_)));

    let tables = schema::existing_tables(&ctx.store).await.unwrap();
    assert!(tables.contains(&"sample_model"));
    assert!(tables.contains(&ALERTED_META.table));
}

#[tokio::test]
async fn test_ledger_round_trip() {
    let ctx = TestContext::new().await;
    ctx.insert_named(&["seen"]).await;
    let sample = ctx.samples().await.remove(0);

    let mut session = ctx.session().await;
    session.add(&Alerted::for_object("alerts.Seen", &sample, chrono::Utc::now()));
    session.commit().await.unwrap();

    let ledger = Alerted::query("alerts.Seen", "sample_model");
    let entries: Vec<Alerted> = query::fetch_all(&ctx.store, &ledger).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, Some(1));
    assert_eq!(entries[0].model_ids, Row::new().with("id", 1));
    assert_eq!(
        query::count_all(&ctx.store, &ALERTED_META).await.unwrap(),
        1
    );
}
