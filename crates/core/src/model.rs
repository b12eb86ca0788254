//! Model metadata and the row representation shared by the store and processors.
//!
//! Every persistable type implements [`Model`] (object-safe, used as
//! `Box<dyn Model>` throughout the processors) and [`Entity`] (typed decoding).
//! The static [`ModelMeta`] describes the backing table.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// RFC 3339 text
    Timestamp,
    /// Serialized JSON text
    Json,
}

impl ColumnType {
    /// SQL type used in DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Text | Self::Timestamp | Self::Json => "TEXT",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnType,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            nullable: true,
            unique: false,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    pub const fn json(name: &'static str) -> Self {
        Self::new(name, ColumnType::Json)
    }

    /// Marks the column as (part of) the primary key. An integer primary key
    /// left `NULL` on insert is assigned by the store.
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Static description of a model's table.
pub struct ModelMeta {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
    /// Builds a boxed model from a row of this table.
    pub decode: fn(&Row) -> Result<Box<dyn Model>>,
}

impl ModelMeta {
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn primary_key_names(&self) -> Vec<&'static str> {
        self.primary_key().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Tables are identified by name.
impl PartialEq for ModelMeta {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}

impl Eq for ModelMeta {}

/// Column name to value mapping for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    /// Missing columns read as `NULL`.
    pub fn get(&self, column: &str) -> &Value {
        self.0.get(column).unwrap_or(&Value::Null)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column) {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| mismatch(column, "integer")),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            _ => Err(mismatch(column, "integer")),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_opt_i64(column)?
            .ok_or_else(|| missing(column))
    }

    pub fn get_opt_f64(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column) {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| mismatch(column, "real")),
            _ => Err(mismatch(column, "real")),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        self.get_opt_f64(column)?.ok_or_else(|| missing(column))
    }

    pub fn get_opt_bool(&self, column: &str) -> Result<Option<bool>> {
        match self.get(column) {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Number(n) => Ok(Some(n.as_i64().unwrap_or(0) != 0)),
            _ => Err(mismatch(column, "boolean")),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        self.get_opt_bool(column)?.ok_or_else(|| missing(column))
    }

    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(mismatch(column, "text")),
        }
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        self.get_opt_string(column)?.ok_or_else(|| missing(column))
    }

    pub fn get_opt_datetime(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_opt_string(column)? {
            None => Ok(None),
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| Error::decode(format!("column '{}': {}", column, e))),
        }
    }

    pub fn get_datetime(&self, column: &str) -> Result<DateTime<Utc>> {
        self.get_opt_datetime(column)?
            .ok_or_else(|| missing(column))
    }

    /// JSON object with one member per column.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Inverse of [`Row::to_json`].
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            other => Err(Error::decode(format!("expected a JSON object, got {}", other))),
        }
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn mismatch(column: &str, expected: &str) -> Error {
    Error::decode(format!("column '{}' is not {}", column, expected))
}

fn missing(column: &str) -> Error {
    Error::decode(format!("column '{}' is NULL", column))
}

/// Encodes a timestamp the way [`ColumnType::Timestamp`] columns store it.
pub fn timestamp_value(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339())
}

/// Upcast helper so trait objects can be downcast to their concrete model.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A persistable record.
pub trait Model: AsAny + Send + Sync + fmt::Debug {
    fn meta(&self) -> &'static ModelMeta;

    /// Current column values, primary key included.
    fn to_row(&self) -> Row;
}

impl<'a> dyn Model + 'a {
    pub fn table(&self) -> &'static str {
        self.meta().table
    }

    /// Primary key column values.
    pub fn primary_key(&self) -> Row {
        let row = self.to_row();
        self.meta()
            .primary_key()
            .map(|c| (c.name.to_string(), row.get(c.name).clone()))
            .collect()
    }

    /// Short human-readable identity, e.g. `SampleModel(id=1)`.
    pub fn label(&self) -> String {
        let ids = self
            .primary_key()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.table(), ids)
    }

    pub fn downcast_ref<T: Model>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Model>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Typed access to a model's table.
pub trait Entity: Model + Sized {
    fn model_meta() -> &'static ModelMeta;

    fn from_row(row: &Row) -> Result<Self>;
}

/// Decoder usable as [`ModelMeta::decode`].
pub fn decode_entity<T: Entity>(row: &Row) -> Result<Box<dyn Model>> {
    Ok(Box::new(T::from_row(row)?))
}
