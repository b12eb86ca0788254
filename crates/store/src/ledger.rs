//! Alert ledger.
//!
//! One `Alerted` row records that an alert already notified about one object.
//! The object is referenced weakly by table name and primary key values.

use chrono::{DateTime, Utc};
use engine_core::{
    col, decode_entity, timestamp_value, ColumnDef, Entity, Error, Model, ModelMeta, Query,
    Result, Row,
};

use crate::session::Session;

pub const ALERTED_TABLE: &str = "__pipeline_alerted__";

pub static ALERTED_META: ModelMeta = ModelMeta {
    table: ALERTED_TABLE,
    columns: &[
        ColumnDef::integer("id").primary_key(),
        ColumnDef::text("alert_path").not_null(),
        ColumnDef::text("model_table").not_null(),
        ColumnDef::json("model_ids").not_null(),
        ColumnDef::timestamp("created_at").not_null(),
    ],
    decode: decode_entity::<Alerted>,
};

/// Ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Alerted {
    pub id: Option<i64>,
    pub alert_path: String,
    pub model_table: String,
    /// Primary key column values of the alerted object
    pub model_ids: Row,
    pub created_at: DateTime<Utc>,
}

impl Alerted {
    /// Entry for `obj`, not yet persisted.
    pub fn for_object(alert_path: impl Into<String>, obj: &dyn Model, created_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            alert_path: alert_path.into(),
            model_table: obj.table().to_string(),
            model_ids: obj.primary_key(),
            created_at,
        }
    }

    pub fn alert_path(&self) -> &str {
        &self.alert_path
    }

    /// Entries written by `alert_path` for objects of `model_table`.
    pub fn query(alert_path: &str, model_table: &str) -> Query {
        Query::new(&ALERTED_META).filter([
            col("alert_path").eq(alert_path),
            col("model_table").eq(model_table),
        ])
    }

    pub async fn registered(
        session: &mut Session,
        alert_path: &str,
        model_table: &str,
    ) -> Result<Vec<Alerted>> {
        session
            .fetch_as::<Alerted>(&Self::query(alert_path, model_table))
            .await
    }

    /// Loads the referenced object; `None` when it no longer exists.
    pub async fn resolve_model(&self, session: &mut Session) -> Result<Option<Box<dyn Model>>> {
        let meta = session.models().get(&self.model_table).ok_or_else(|| {
            Error::type_error(format!(
                "Ledger references unregistered model table '{}'",
                self.model_table
            ))
        })?;
        session.get(meta, &self.model_ids).await
    }
}

impl Model for Alerted {
    fn meta(&self) -> &'static ModelMeta {
        &ALERTED_META
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("alert_path", self.alert_path.clone())
            .with("model_table", self.model_table.clone())
            .with("model_ids", self.model_ids.to_json())
            .with("created_at", timestamp_value(self.created_at))
    }
}

impl Entity for Alerted {
    fn model_meta() -> &'static ModelMeta {
        &ALERTED_META
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_opt_i64("id")?,
            alert_path: row.get_string("alert_path")?,
            model_table: row.get_string("model_table")?,
            model_ids: Row::from_json(row.get("model_ids"))?,
            created_at: row.get_datetime("created_at")?,
        })
    }
}
