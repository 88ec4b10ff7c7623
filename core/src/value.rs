//! Owned dynamic SQL value and row types.

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use std::fmt;

use crate::error::{Result, TrellisError};

/// A dynamic SQL value carried through bindings and rows.
///
/// Native types are kept as-is until immediately before adapter execution;
/// dialect-specific coercion (bool to 0/1, datetime to ISO text, JSON to
/// serialized text) happens in `Grammar::prepare_bindings`, never earlier.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Integer(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Normalized string form used to bucket eager-match results.
    ///
    /// Parent keys and child foreign keys may hydrate as different types
    /// (integer vs text) depending on the driver; comparing the coerced
    /// string form keeps the partitioning immune to that mismatch.
    pub fn key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bool(b) => (*b as i64).to_string(),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Coerces a scalar aggregate result to f64, treating NULL as zero.
    pub fn to_numeric(&self) -> Result<f64> {
        match self {
            Value::Null => Ok(0.0),
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(r) => Ok(*r),
            Value::Text(s) => s
                .parse::<f64>()
                .map_err(|_| TrellisError::Mapping(format!("non-numeric aggregate: {s:?}"))),
            other => Err(TrellisError::Mapping(format!(
                "non-numeric aggregate: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A single result row: column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self {
            columns: HashMap::new(),
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Removes a column, returning its value.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Required typed getter; errors if the column is absent.
    pub fn require(&self, column: &str) -> Result<&Value> {
        self.get(column)
            .ok_or_else(|| TrellisError::Mapping(format!("missing column {column:?}")))
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.require(column)? {
            Value::Integer(i) => Ok(*i),
            Value::Text(s) => s
                .parse()
                .map_err(|_| TrellisError::Mapping(format!("column {column:?} is not an integer"))),
            other => Err(TrellisError::Mapping(format!(
                "column {column:?} is not an integer: {other:?}"
            ))),
        }
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        Ok(self.require(column)?.key_string())
    }

    pub fn get_opt_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_opt_string(&self, column: &str) -> Option<String> {
        match self.get(column) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.key_string()),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
