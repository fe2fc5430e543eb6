//! SQLite binding over a sqlx pool.
//!
//! SQLite has no callable statements, so [`QueryOperations::call`] always fails with
//! [`Error::Unsupported`]. Timestamps are bound as `YYYY-MM-DD HH:MM:SS` text so they
//! compare correctly with `datetime('now')`.

use super::{
    coerce_scalar, expand_named_params, PlaceholderStyle, QueryOperations, TransactionOperations,
    TransactionScope,
};
use crate::error::{Error, Result};
use crate::types::{NamedParams, OutParam, ScalarKind, SqlRow, SqlValue};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, Transaction, TypeInfo, ValueRef};

pub const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    /// Open a pool with WAL journaling, a 5s busy timeout and foreign keys enforced.
    pub async fn connect(dsn: &str) -> Result<Self> {
        Self::connect_with(dsn, 4).await
    }

    pub async fn connect_with(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode=WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout=5000")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA foreign_keys=ON")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(dsn)
            .await
            .map_err(Error::Database)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value.clone() {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v.format(SQLITE_TIMESTAMP_FORMAT).to_string()),
    }
}

/// Decode by the storage class of the value, not the declared column type.
fn decode_column(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        raw.type_info().name().to_string()
    };
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" | "NUMERIC" => SqlValue::Int(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "TEXT" | "DATETIME" | "DATE" | "TIME" => {
            SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?)
        }
        other => {
            return Err(Error::UnexpectedValue {
                column: row.columns()[idx].name().to_string(),
                expected: format!("a supported storage class, got {}", other),
            })
        }
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow) -> Result<SqlRow> {
    let mut decoded = SqlRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        decoded.push(column.name(), decode_column(row, idx)?);
    }
    Ok(decoded)
}

async fn fetch_all<'e, E>(executor: E, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expanded = expand_named_params(sql, params, PlaceholderStyle::Question)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "sqlite query");
    let mut query = sqlx::query(&expanded.sql);
    for value in &expanded.values {
        query = bind_value(query, value);
    }
    let rows = query.fetch_all(executor).await?;
    rows.iter().map(decode_row).collect()
}

async fn fetch_scalar<'e, E>(
    executor: E,
    sql: &str,
    params: &NamedParams,
    kind: ScalarKind,
) -> Result<Option<SqlValue>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expanded = expand_named_params(sql, params, PlaceholderStyle::Question)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "sqlite scalar");
    let mut query = sqlx::query(&expanded.sql);
    for value in &expanded.values {
        query = bind_value(query, value);
    }
    match query.fetch_optional(executor).await? {
        Some(row) if !row.columns().is_empty() => coerce_scalar(decode_column(&row, 0)?, kind),
        _ => Ok(None),
    }
}

async fn execute<'e, E>(executor: E, sql: &str, params: &NamedParams) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expanded = expand_named_params(sql, params, PlaceholderStyle::Question)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "sqlite update");
    let mut query = sqlx::query(&expanded.sql);
    for value in &expanded.values {
        query = bind_value(query, value);
    }
    Ok(query.execute(executor).await?.rows_affected())
}

fn unsupported_call() -> Error {
    Error::Unsupported {
        dialect: "sqlite",
        operation: "call",
    }
}

#[async_trait]
impl QueryOperations for SqliteDriver {
    async fn query_scalar(&mut self, sql: &str, kind: ScalarKind) -> Result<Option<SqlValue>> {
        fetch_scalar(&self.pool, sql, &NamedParams::new(), kind).await
    }

    async fn query_scalar_with(
        &mut self,
        sql: &str,
        params: &NamedParams,
        kind: ScalarKind,
    ) -> Result<Option<SqlValue>> {
        fetch_scalar(&self.pool, sql, params, kind).await
    }

    async fn update(&mut self, sql: &str, params: &NamedParams) -> Result<u64> {
        execute(&self.pool, sql, params).await
    }

    async fn query_rows(&mut self, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>> {
        fetch_all(&self.pool, sql, params).await
    }

    async fn call(&mut self, _sql: &str, _params: &NamedParams, _outputs: &[OutParam]) -> Result<SqlRow> {
        Err(unsupported_call())
    }
}

pub struct SqliteTransactionScope {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl QueryOperations for SqliteTransactionScope {
    async fn query_scalar(&mut self, sql: &str, kind: ScalarKind) -> Result<Option<SqlValue>> {
        fetch_scalar(&mut *self.tx, sql, &NamedParams::new(), kind).await
    }

    async fn query_scalar_with(
        &mut self,
        sql: &str,
        params: &NamedParams,
        kind: ScalarKind,
    ) -> Result<Option<SqlValue>> {
        fetch_scalar(&mut *self.tx, sql, params, kind).await
    }

    async fn update(&mut self, sql: &str, params: &NamedParams) -> Result<u64> {
        execute(&mut *self.tx, sql, params).await
    }

    async fn query_rows(&mut self, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>> {
        fetch_all(&mut *self.tx, sql, params).await
    }

    async fn call(&mut self, _sql: &str, _params: &NamedParams, _outputs: &[OutParam]) -> Result<SqlRow> {
        Err(unsupported_call())
    }
}

#[async_trait]
impl TransactionScope for SqliteTransactionScope {
    fn operations(&mut self) -> &mut dyn QueryOperations {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionOperations for SqliteDriver {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransactionScope { tx }))
    }

    fn driver_name(&self) -> &'static str {
        "sqlite"
    }
}
