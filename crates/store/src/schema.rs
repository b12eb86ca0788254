//! Table DDL for registered models.

use engine_core::{quote_ident, DbErrorCode, Error, ModelMeta, Result};
use sqlx::Row as _;
use tracing::info;

use crate::client::StoreClient;

/// `CREATE TABLE` statement for one model.
///
/// A single integer primary key becomes SQLite's rowid alias so inserts
/// without a key get one assigned.
pub fn create_table_sql(meta: &ModelMeta) -> String {
    let keys = meta.primary_key_names();
    let inline_key = keys.len() == 1;

    let mut defs: Vec<String> = meta
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote_ident(c.name), c.kind.sql_type());
            if c.primary_key && inline_key {
                def.push_str(" PRIMARY KEY");
            } else if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if c.unique && !c.primary_key {
                def.push_str(" UNIQUE");
            }
            def
        })
        .collect();

    if keys.len() > 1 {
        let cols = keys
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        defs.push(format!("PRIMARY KEY ({})", cols));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(meta.table),
        defs.join(",\n    ")
    )
}

/// Registered tables that already exist in the database.
pub async fn existing_tables(client: &StoreClient) -> Result<Vec<&'static str>> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(client.pool())
        .await
        .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;

    let mut names = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;
        names.push(name);
    }

    Ok(client
        .models()
        .all()
        .map(|m| m.table)
        .filter(|table| names.iter().any(|n| n == table))
        .collect())
}

/// Creates every registered table in one transaction. Refuses to touch a
/// database that already holds any of them.
pub async fn create_all(client: &StoreClient) -> Result<Vec<&'static str>> {
    let existing = existing_tables(client).await?;
    if !existing.is_empty() {
        return Err(Error::improperly_configured(format!(
            "Database already has tables: {}",
            existing.join(", ")
        )));
    }

    let mut session = client.session().await?;
    let mut created = Vec::new();
    for meta in client.models().all() {
        if let Err(e) = session.execute(&create_table_sql(meta), &[]).await {
            session.rollback().await?;
            return Err(e);
        }
        created.push(meta.table);
    }
    session.commit().await?;

    info!(tables = ?created, "Database created");
    Ok(created)
}
