//! SQL Server queue DAOs.
//!
//! Ids come from an `IDENTITY` column and are read back with `OUTPUT inserted`.
//! Picking uses `READPAST` so rows locked by other pickers are skipped, ordered by id.

use super::{
    claim_assignments, claim_params, delay_seconds, delete_sql, enqueue_params, ext_columns,
    ext_placeholders, missing_id, reenqueue_sql, task_params, updated, QueueDao,
    QueuePickTaskDao, SqlCache, EXECUTION_DELAY_PARAM, QUEUE_NAME_PARAM,
};
use crate::driver::QueryOperations;
use crate::error::Result;
use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
use crate::types::{EnqueueParams, NamedParams, ScalarKind, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

fn now_plus_delay() -> String {
    format!("DATEADD(second, :{}, SYSDATETIMEOFFSET())", EXECUTION_DELAY_PARAM)
}

fn inserted_columns(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("inserted.{}", column))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn enqueue_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "INSERT INTO {table} ({queue}, {payload}, {next}, {attempt}, {reenqueue}, {total}{ext}) \
         OUTPUT inserted.{id} \
         VALUES (:queueName, :payload, {now_plus}, 0, 0, 0{ext_values})",
        table = location.table_name(),
        queue = schema.queue_name_field(),
        payload = schema.payload_field(),
        next = schema.next_process_at_field(),
        attempt = schema.attempt_field(),
        reenqueue = schema.reenqueue_attempt_field(),
        total = schema.total_attempt_field(),
        ext = ext_columns(schema),
        id = schema.id_field(),
        now_plus = now_plus_delay(),
        ext_values = ext_placeholders(schema),
    )
}

pub(crate) fn reenqueue_sql_for(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    reenqueue_sql(schema, location, &now_plus_delay())
}

pub(crate) fn pick_lock_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "SELECT TOP (1) {id}, {attempt} FROM {table} WITH (READPAST, UPDLOCK, ROWLOCK) \
         WHERE {queue} = :queueName AND {next} <= SYSDATETIMEOFFSET() ORDER BY {id} ASC",
        id = schema.id_field(),
        attempt = schema.attempt_field(),
        table = location.table_name(),
        queue = schema.queue_name_field(),
        next = schema.next_process_at_field(),
    )
}

pub(crate) fn pick_claim_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "UPDATE {table} SET {assignments} OUTPUT {columns} WHERE {id} = :id",
        table = location.table_name(),
        assignments = claim_assignments(schema, &now_plus_delay()),
        columns = inserted_columns(&schema.task_columns()),
        id = schema.id_field(),
    )
}

#[derive(Debug)]
pub struct MssqlQueueDao {
    schema: Arc<QueueTableSchema>,
    enqueue_sql: SqlCache<QueueLocation>,
    delete_sql: SqlCache<QueueLocation>,
    reenqueue_sql: SqlCache<QueueLocation>,
}

impl MssqlQueueDao {
    pub fn new(schema: Arc<QueueTableSchema>) -> Self {
        Self {
            schema,
            enqueue_sql: SqlCache::new(),
            delete_sql: SqlCache::new(),
            reenqueue_sql: SqlCache::new(),
        }
    }
}

#[async_trait]
impl QueueDao for MssqlQueueDao {
    async fn enqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        params: &EnqueueParams,
    ) -> Result<i64> {
        let named = enqueue_params(&self.schema, location, params)?;
        let sql = self.enqueue_sql.get_or_build(location, || {
            tracing::debug!(%location, "building mssql enqueue statement");
            enqueue_sql(&self.schema, location)
        });
        ops.query_scalar_with(&sql, &named, ScalarKind::Int)
            .await?
            .and_then(|id| id.as_i64())
            .ok_or_else(|| missing_id(location))
    }

    async fn delete_task(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
    ) -> Result<bool> {
        let sql = self
            .delete_sql
            .get_or_build(location, || delete_sql(&self.schema, location));
        Ok(updated(ops.update(&sql, &task_params(location, task_id)).await?))
    }

    async fn reenqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
        execution_delay: Duration,
    ) -> Result<bool> {
        let sql = self
            .reenqueue_sql
            .get_or_build(location, || reenqueue_sql_for(&self.schema, location));
        let params = task_params(location, task_id)
            .with(EXECUTION_DELAY_PARAM, delay_seconds(execution_delay));
        Ok(updated(ops.update(&sql, &params).await?))
    }
}

#[derive(Debug)]
pub struct MssqlPickTaskDao {
    schema: Arc<QueueTableSchema>,
    location: QueueLocation,
    failure: Arc<dyn FailureSettings>,
    lock_sql: String,
    claim_sql: String,
}

impl MssqlPickTaskDao {
    pub fn new(
        schema: Arc<QueueTableSchema>,
        location: QueueLocation,
        failure: Arc<dyn FailureSettings>,
    ) -> Self {
        let lock_sql = pick_lock_sql(&schema, &location);
        let claim_sql = pick_claim_sql(&schema, &location);
        Self {
            schema,
            location,
            failure,
            lock_sql,
            claim_sql,
        }
    }
}

#[async_trait]
impl QueuePickTaskDao for MssqlPickTaskDao {
    async fn pick_task(&self, ops: &mut dyn QueryOperations) -> Result<Option<TaskRecord>> {
        let lock_params =
            NamedParams::new().with(QUEUE_NAME_PARAM, self.location.queue_id().as_str());
        let candidates = ops.query_rows(&self.lock_sql, &lock_params).await?;
        let Some(row) = candidates.first() else {
            tracing::debug!(location = %self.location, "no eligible task");
            return Ok(None);
        };

        let task_id = row.get_i64(self.schema.id_field())?;
        let attempt = row.get_i64(self.schema.attempt_field())?;
        let params = claim_params(&self.location, task_id, self.failure.as_ref(), attempt);
        let claimed = ops.query_rows(&self.claim_sql, &params).await?;
        let task = claimed
            .first()
            .map(|row| TaskRecord::from_row(row, &self.schema))
            .transpose()?;
        tracing::debug!(location = %self.location, task_id, "picked task");
        Ok(task)
    }

    fn location(&self) -> &QueueLocation {
        &self.location
    }
}
