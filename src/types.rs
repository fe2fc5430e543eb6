//! Core value types: bound parameters, result rows, enqueue parameters and task records.
//!
//! ## What
//!
//! - [`SqlValue`] is the driver-neutral value exchanged with a [`crate::driver::QueryOperations`] binding.
//! - [`NamedParams`] binds `:name` placeholders; [`SqlRow`] is one result row.
//! - [`EnqueueParams`] describes a task to insert, [`TaskRecord`] a task returned by pick-task.
//!
//! ## How
//!
//! ```rust
//! use dbqueue::types::{EnqueueParams, SqlValue};
//! use std::time::Duration;
//!
//! let params = EnqueueParams::new()
//!     .with_payload("{\"user\": 42}")
//!     .with_execution_delay(Duration::from_secs(30))
//!     .with_ext_data("tenant", SqlValue::from("acme"));
//! assert_eq!(params.execution_delay().as_secs(), 30);
//! ```

use crate::error::{Error, Result};
use crate::settings::QueueTableSchema;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Driver-neutral SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamps arrive as native values or as text (SQLite `datetime()` or RFC 3339).
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Requested result type for scalar queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Text,
    Bool,
    Timestamp,
}

/// Values bound to `:name` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: BTreeMap<String, SqlValue>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<SqlValue>>(&mut self, name: K, value: V) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with<K: Into<String>, V: Into<SqlValue>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Output parameter of a callable statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParam {
    pub name: String,
    pub kind: ScalarKind,
}

impl OutParam {
    pub fn new<S: Into<String>>(name: S, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One result row. Column lookup is case-insensitive since engines disagree on the
/// case of unquoted identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<String>, V: Into<SqlValue>>(&mut self, column: S, value: V) {
        self.columns.push((column.into(), value.into()));
    }

    pub fn with<S: Into<String>, V: Into<SqlValue>>(mut self, column: S, value: V) -> Self {
        self.push(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, column: &str) -> Result<&SqlValue> {
        self.get(column).ok_or_else(|| Error::MissingColumn {
            column: column.to_string(),
        })
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_opt_i64(column)?
            .ok_or_else(|| unexpected(column, "non-null integer"))
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        let value = self.require(column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .ok_or_else(|| unexpected(column, "integer"))
    }

    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            _ => Err(unexpected(column, "text")),
        }
    }

    pub fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        self.require(column)?
            .as_timestamp()
            .ok_or_else(|| unexpected(column, "timestamp"))
    }
}

fn unexpected(column: &str, expected: &str) -> Error {
    Error::UnexpectedValue {
        column: column.to_string(),
        expected: expected.to_string(),
    }
}

/// Parameters of a single enqueue call.
///
/// `ext_data` keys must be extension fields declared by the table schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueParams {
    payload: Option<String>,
    execution_delay: Duration,
    ext_data: BTreeMap<String, SqlValue>,
}

impl EnqueueParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    pub fn with_ext_data<K: Into<String>, V: Into<SqlValue>>(mut self, field: K, value: V) -> Self {
        self.ext_data.insert(field.into(), value.into());
        self
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn execution_delay(&self) -> Duration {
        self.execution_delay
    }

    pub fn ext_data(&self) -> &BTreeMap<String, SqlValue> {
        &self.ext_data
    }
}

/// A task claimed by pick-task.
///
/// Attempt counters reflect the claim: `attempts_count` is already incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub payload: Option<String>,
    pub attempts_count: i64,
    pub reenqueue_attempts_count: i64,
    pub total_attempts_count: i64,
    pub created_at: DateTime<Utc>,
    pub next_process_at: DateTime<Utc>,
    pub ext_data: BTreeMap<String, SqlValue>,
}

impl TaskRecord {
    pub(crate) fn from_row(row: &SqlRow, schema: &QueueTableSchema) -> Result<Self> {
        let mut ext_data = BTreeMap::new();
        for field in schema.ext_fields() {
            let value = row.get(field).cloned().unwrap_or(SqlValue::Null);
            ext_data.insert(field.clone(), value);
        }

        Ok(Self {
            id: row.get_i64(schema.id_field())?,
            payload: row.get_opt_string(schema.payload_field())?,
            attempts_count: row.get_i64(schema.attempt_field())?,
            reenqueue_attempts_count: row.get_i64(schema.reenqueue_attempt_field())?,
            total_attempts_count: row.get_i64(schema.total_attempt_field())?,
            created_at: row.get_timestamp(schema.created_at_field())?,
            next_process_at: row.get_timestamp(schema.next_process_at_field())?,
            ext_data,
        })
    }
}

impl fmt::Display for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskRecord {{ id: {}, attempt: {}, reenqueue_attempt: {}, total_attempt: {}, next_process_at: {} }}",
            self.id,
            self.attempts_count,
            self.reenqueue_attempts_count,
            self.total_attempts_count,
            self.next_process_at
        )
    }
}
