//! PostgreSQL binding over a sqlx pool.

use super::{
    coerce_scalar, collect_outputs, expand_named_params_inline_nulls, ExpandedSql,
    PlaceholderStyle, QueryOperations, TransactionOperations, TransactionScope,
};
use crate::error::{Error, Result};
use crate::types::{NamedParams, OutParam, ScalarKind, SqlRow, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Postgres, Row, Transaction, TypeInfo};

const DEFAULT_MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    pub async fn connect(dsn: &str) -> Result<Self> {
        Self::connect_with(dsn, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(Error::Database)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// NULLs are inlined as literals: a bound NULL carries a declared type, and a text
/// one does not assign to bigint or timestamptz columns.
fn expand(sql: &str, params: &NamedParams) -> Result<ExpandedSql> {
    expand_named_params_inline_nulls(sql, params, PlaceholderStyle::Dollar)
}

fn prepare(expanded: &ExpandedSql) -> Query<'_, Postgres, PgArguments> {
    expanded
        .values
        .iter()
        .fold(sqlx::query(&expanded.sql), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value.clone() {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
    }
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlValue> {
    let value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(|v| SqlValue::Int(v.into())),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(|v| SqlValue::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Int),
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(|v| SqlValue::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text)
        }
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
        "VOID" => None,
        other => {
            return Err(Error::UnexpectedValue {
                column: row.columns()[idx].name().to_string(),
                expected: format!("a supported column type, got {}", other),
            })
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn decode_row(row: &PgRow) -> Result<SqlRow> {
    let mut decoded = SqlRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name())?;
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}

async fn fetch_all<'e, E>(executor: E, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let expanded = expand(sql, params)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "postgres query");
    let query = prepare(&expanded);
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
    E: Executor<'e, Database = Postgres>,
{
    let expanded = expand(sql, params)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "postgres scalar");
    let query = prepare(&expanded);
    match query.fetch_optional(executor).await? {
        Some(row) if !row.columns().is_empty() => {
            let value = decode_column(&row, 0, row.columns()[0].type_info().name())?;
            coerce_scalar(value, kind)
        }
        _ => Ok(None),
    }
}

async fn execute<'e, E>(executor: E, sql: &str, params: &NamedParams) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let expanded = expand(sql, params)?;
    tracing::trace!(sql = %expanded.sql, binds = expanded.values.len(), "postgres update");
    let query = prepare(&expanded);
    Ok(query.execute(executor).await?.rows_affected())
}

/// Autocommit operations on the pool, one statement per connection checkout.
#[async_trait]
impl QueryOperations for PgDriver {
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

    async fn call(
        &mut self,
        sql: &str,
        params: &NamedParams,
        outputs: &[OutParam],
    ) -> Result<SqlRow> {
        let rows = fetch_all(&self.pool, sql, params).await?;
        collect_outputs(rows.into_iter().next(), outputs)
    }
}

pub struct PgTransactionScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl QueryOperations for PgTransactionScope {
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

    /// PostgreSQL has no output parameters: the block is expected to be a query whose
    /// first row carries them as columns.
    async fn call(
        &mut self,
        sql: &str,
        params: &NamedParams,
        outputs: &[OutParam],
    ) -> Result<SqlRow> {
        let rows = fetch_all(&mut *self.tx, sql, params).await?;
        collect_outputs(rows.into_iter().next(), outputs)
    }
}

#[async_trait]
impl TransactionScope for PgTransactionScope {
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
impl TransactionOperations for PgDriver {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransactionScope { tx }))
    }

    fn driver_name(&self) -> &'static str {
        "postgres"
    }
}
