//! Read helpers outside a unit of work (used in tests and admin).
//!
//! Each call opens its own session and rolls it back afterwards.

use engine_core::{Entity, Model, ModelMeta, Query, Result};

use crate::client::StoreClient;

/// Count rows matching `query`.
pub async fn count(client: &StoreClient, query: &Query) -> Result<i64> {
    let mut session = client.session().await?;
    let result = session.count(query).await;
    session.rollback().await?;
    result
}

/// Count all rows of a table.
pub async fn count_all(client: &StoreClient, meta: &'static ModelMeta) -> Result<i64> {
    count(client, &Query::new(meta)).await
}

/// Fetch matching rows as a concrete entity type.
pub async fn fetch_all<T: Entity>(client: &StoreClient, query: &Query) -> Result<Vec<T>> {
    let mut session = client.session().await?;
    let result = session.fetch_as::<T>(query).await;
    session.rollback().await?;
    result
}

/// Fetch matching rows as boxed models.
pub async fn fetch_models(client: &StoreClient, query: &Query) -> Result<Vec<Box<dyn Model>>> {
    let mut session = client.session().await?;
    let result = session.fetch(query).await;
    session.rollback().await?;
    result
}
