//! Transactional session.
//!
//! A [`Session`] owns one database transaction. Saves and deletes are staged
//! and written on [`Session::flush`], which every read performs first so
//! queries observe staged changes. [`Session::close`] commits a successful
//! unit of work and rolls back a failed one; dropping an open session rolls
//! back.

use std::sync::Arc;
use std::time::Instant;

use engine_core::{
    quote_ident, ColumnType, DbErrorCode, Entity, Error, Model, ModelMeta, Query, Result, Row,
    Value,
};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row as _, Sqlite, Transaction};
use telemetry::metrics;
use tracing::{debug, warn};

use crate::registry::ModelRegistry;

type SqlQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Debug)]
enum Pending {
    Save {
        meta: &'static ModelMeta,
        row: Row,
    },
    Delete {
        meta: &'static ModelMeta,
        key: Row,
    },
}

/// One unit of work against the store.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
    models: Arc<ModelRegistry>,
    pending: Vec<Pending>,
}

impl Session {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>, models: Arc<ModelRegistry>) -> Self {
        Self {
            tx,
            models,
            pending: Vec::new(),
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Stages an insert-or-update of the object's current state.
    ///
    /// Objects with a `NULL` primary key are inserted and the store assigns
    /// the key.
    pub fn add(&mut self, obj: &dyn Model) {
        self.pending.push(Pending::Save {
            meta: obj.meta(),
            row: obj.to_row(),
        });
    }

    /// Stages a delete by primary key.
    pub fn delete(&mut self, obj: &dyn Model) {
        self.pending.push(Pending::Delete {
            meta: obj.meta(),
            key: obj.primary_key(),
        });
    }

    /// Number of staged changes not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Writes staged changes inside the transaction.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let start = Instant::now();
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();

        for change in pending {
            let (sql, params) = match &change {
                Pending::Save { meta, row } => save_sql(meta, row),
                Pending::Delete { meta, key } => match delete_sql(meta, key) {
                    Some(stmt) => stmt,
                    None => continue,
                },
            };
            bind_all(sqlx::query(&sql), &params)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    metrics().flush_errors.inc();
                    Error::database(
                        DbErrorCode::FlushFailed,
                        format!("{}: {}", change_table(&change), e),
                    )
                })?;
        }

        metrics().rows_flushed.inc_by(total as u64);
        metrics()
            .flush_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        debug!(rows = total, "Session flushed");
        Ok(total)
    }

    /// Runs a raw statement after flushing.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.flush().await?;
        let done = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;
        Ok(done.rows_affected())
    }

    /// Matching rows, decoded per the declared column types.
    pub async fn fetch_rows(&mut self, query: &Query) -> Result<Vec<Row>> {
        self.flush().await?;
        let (sql, params) = query.to_sql();
        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;
        rows.iter().map(|r| decode_row(query.meta(), r)).collect()
    }

    /// Matching rows as boxed models.
    pub async fn fetch(&mut self, query: &Query) -> Result<Vec<Box<dyn Model>>> {
        let meta = query.meta();
        self.fetch_rows(query)
            .await?
            .iter()
            .map(|row| (meta.decode)(row))
            .collect()
    }

    /// Matching rows as a concrete entity type.
    pub async fn fetch_as<T: Entity>(&mut self, query: &Query) -> Result<Vec<T>> {
        self.fetch_rows(query)
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    pub async fn count(&mut self, query: &Query) -> Result<i64> {
        self.flush().await?;
        let (sql, params) = query.count_sql();
        let row = bind_all(sqlx::query(&sql), &params)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| Error::database(DbErrorCode::QueryFailed, e.to_string()))
    }

    /// Looks an object up by primary key.
    pub async fn get(&mut self, meta: &'static ModelMeta, key: &Row) -> Result<Option<Box<dyn Model>>> {
        let conditions = meta
            .primary_key()
            .map(|c| engine_core::col(c.name).eq(key.get(c.name).clone()));
        let query = Query::new(meta).filter(conditions).limit(1);
        Ok(self.fetch(&query).await?.into_iter().next())
    }

    /// Flushes and commits.
    pub async fn commit(mut self) -> Result<()> {
        self.flush().await?;
        self.tx
            .commit()
            .await
            .map_err(|e| Error::database(DbErrorCode::TransactionFailed, e.to_string()))?;
        debug!("Session committed");
        Ok(())
    }

    /// Discards staged and written changes.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::database(DbErrorCode::TransactionFailed, e.to_string()))?;
        debug!("Session rolled back");
        Ok(())
    }

    /// Ends the unit of work: commit when `outcome` is `Ok`, rollback otherwise.
    pub async fn close<T>(self, outcome: &Result<T>) -> Result<()> {
        match outcome {
            Ok(_) => self.commit().await,
            Err(err) => {
                warn!(error = %err, "Rolling back session");
                self.rollback().await
            }
        }
    }
}

fn change_table(change: &Pending) -> &'static str {
    match change {
        Pending::Save { meta, .. } | Pending::Delete { meta, .. } => meta.table,
    }
}

/// Upsert when every key column is set, plain insert otherwise.
fn save_sql(meta: &ModelMeta, row: &Row) -> (String, Vec<Value>) {
    let keyed = meta.primary_key().count() > 0
        && meta.primary_key().all(|c| !row.get(c.name).is_null());

    let columns: Vec<_> = meta
        .columns
        .iter()
        .filter(|c| keyed || !(c.primary_key && row.get(c.name).is_null()))
        .collect();

    let names = columns
        .iter()
        .map(|c| quote_ident(c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let marks = vec!["?"; columns.len()].join(", ");
    let params = columns.iter().map(|c| row.get(c.name).clone()).collect();

    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(meta.table))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(meta.table),
            names,
            marks
        )
    };

    if keyed {
        let key = meta
            .primary_key()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = meta
            .columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| format!("{0} = excluded.{0}", quote_ident(c.name)))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", key));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                key,
                updates.join(", ")
            ));
        }
    }

    (sql, params)
}

/// `None` when the object was never persisted.
fn delete_sql(meta: &ModelMeta, key: &Row) -> Option<(String, Vec<Value>)> {
    if key.is_empty() || key.iter().any(|(_, v)| v.is_null()) {
        return None;
    }
    let clause = key
        .iter()
        .map(|(k, _)| format!("{} = ?", quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let params = key.iter().map(|(_, v)| v.clone()).collect();
    Some((
        format!("DELETE FROM {} WHERE {}", quote_ident(meta.table), clause),
        params,
    ))
}

fn bind_all<'q>(mut query: SqlQuery<'q>, params: &[Value]) -> SqlQuery<'q> {
    for value in params {
        query = bind_value(query, value);
    }
    query
}

fn bind_value<'q>(query: SqlQuery<'q>, value: &Value) -> SqlQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(meta: &ModelMeta, row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for column in meta.columns {
        let name = column.name;
        let fail = |e: sqlx::Error| Error::decode(format!("{}.{}: {}", meta.table, name, e));
        let value = match column.kind {
            ColumnType::Integer => Value::from(row.try_get::<Option<i64>, _>(name).map_err(fail)?),
            ColumnType::Real => Value::from(row.try_get::<Option<f64>, _>(name).map_err(fail)?),
            ColumnType::Boolean => {
                Value::from(row.try_get::<Option<bool>, _>(name).map_err(fail)?)
            }
            ColumnType::Text | ColumnType::Timestamp => {
                Value::from(row.try_get::<Option<String>, _>(name).map_err(fail)?)
            }
            ColumnType::Json => match row.try_get::<Option<String>, _>(name).map_err(fail)? {
                Some(text) => serde_json::from_str(&text)?,
                None => Value::Null,
            },
        };
        out.insert(name, value);
    }
    Ok(out)
}
