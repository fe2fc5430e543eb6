//! Driver capability interface.
//!
//! This is the only seam between the data-access layer and a concrete SQL binding.
//! DAOs talk to [`QueryOperations`]; the facade opens transactions through
//! [`TransactionOperations`]. Nothing else in the crate touches a driver API.
//!
//! ## What
//!
//! - [`QueryOperations`]: scalar queries, updates, and two escape hatches (`query_rows`
//!   for prepared statements, `call` for callable statements with output parameters).
//! - [`TransactionOperations`] / [`TransactionScope`]: begin, commit, rollback.
//! - [`expand_named_params`]: rewrites `:name` placeholders for positional drivers.
//! - Adapters: [`postgres::PgDriver`] and [`sqlite::SqliteDriver`] (sqlx), plus
//!   [`recording::RecordingDriver`], an in-memory fake for tests.

use crate::error::Result;
use crate::types::{NamedParams, OutParam, ScalarKind, SqlRow, SqlValue};
use async_trait::async_trait;

mod named;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod recording;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use named::{
    expand_named_params, expand_named_params_inline_nulls, ExpandedSql, PlaceholderStyle,
};

/// Query primitives the DAOs need from a SQL binding.
///
/// SQL text uses `:name` placeholders. Implementations issue each statement once: no
/// retries, no error translation. Timeouts and cancellation are the binding's concern.
#[async_trait]
pub trait QueryOperations: Send {
    /// First column of the first row, `None` when there are no rows or the value is NULL.
    async fn query_scalar(&mut self, sql: &str, kind: ScalarKind) -> Result<Option<SqlValue>>;

    async fn query_scalar_with(
        &mut self,
        sql: &str,
        params: &NamedParams,
        kind: ScalarKind,
    ) -> Result<Option<SqlValue>>;

    /// Execute a DML statement and return the affected row count.
    async fn update(&mut self, sql: &str, params: &NamedParams) -> Result<u64>;

    /// Prepared-statement escape hatch: every row of the result, mapped column by column.
    async fn query_rows(&mut self, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>>;

    /// Callable-statement escape hatch: run a block or procedure and read its output
    /// parameters back as a single row keyed by parameter name. Output parameters
    /// appear in the SQL as `:name` but are declared in `outputs`, not bound in `params`.
    async fn call(&mut self, sql: &str, params: &NamedParams, outputs: &[OutParam])
        -> Result<SqlRow>;
}

/// A live transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait TransactionScope: Send {
    fn operations(&mut self) -> &mut dyn QueryOperations;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Opens transactions on a SQL binding.
#[async_trait]
pub trait TransactionOperations: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>>;

    /// Short name of the binding, used in logs.
    fn driver_name(&self) -> &'static str;
}

/// Convert the first column of a scalar query to the requested kind.
#[cfg(feature = "sqlx")]
pub(crate) fn coerce_scalar(value: SqlValue, kind: ScalarKind) -> Result<Option<SqlValue>> {
    let expected = match kind {
        ScalarKind::Int => "integer",
        ScalarKind::Text => "text",
        ScalarKind::Bool => "boolean",
        ScalarKind::Timestamp => "timestamp",
    };
    let converted = match (kind, value) {
        (_, SqlValue::Null) => return Ok(None),
        (ScalarKind::Int, SqlValue::Float(v)) if v.fract() == 0.0 => Some(SqlValue::Int(v as i64)),
        (ScalarKind::Int, v) => v.as_i64().map(SqlValue::Int),
        (ScalarKind::Text, SqlValue::Text(v)) => Some(SqlValue::Text(v)),
        (ScalarKind::Text, v) => Some(SqlValue::Text(v.to_string())),
        (ScalarKind::Bool, SqlValue::Bool(v)) => Some(SqlValue::Bool(v)),
        (ScalarKind::Bool, v) => v.as_i64().map(|i| SqlValue::Bool(i != 0)),
        (ScalarKind::Timestamp, v) => v.as_timestamp().map(SqlValue::Timestamp),
    };
    converted.map(Some).ok_or_else(|| crate::error::Error::UnexpectedValue {
        column: "0".to_string(),
        expected: expected.to_string(),
    })
}

/// Output parameters read back from the first row of a callable statement. Parameters
/// the row does not carry come back as NULL.
#[cfg(feature = "sqlx")]
pub(crate) fn collect_outputs(row: Option<SqlRow>, outputs: &[OutParam]) -> Result<SqlRow> {
    let row = row.unwrap_or_default();
    let mut collected = SqlRow::new();
    for output in outputs {
        let value = row.get(&output.name).cloned().unwrap_or(SqlValue::Null);
        collected.push(output.name.clone(), coerce_scalar(value, output.kind)?);
    }
    Ok(collected)
}
