//! Oracle 11g queue DAOs.
//!
//! Oracle 11g has no identity columns: every enqueue first draws the id from the
//! location's sequence and inserts it explicitly. A location without a sequence is a
//! configuration error, reported before any statement runs.
//!
//! A bare `SELECT ... FOR UPDATE SKIP LOCKED` cannot be limited to one row, so the
//! pick runs a PL/SQL block that opens a locking cursor and fetches its first row into
//! output parameters.

use super::{
    claim_assignments, claim_params, delay_seconds, delete_sql, enqueue_params, ext_columns,
    ext_placeholders, reenqueue_sql, task_params, updated, QueueDao, QueuePickTaskDao, SqlCache,
    EXECUTION_DELAY_PARAM, ID_PARAM, QUEUE_NAME_PARAM,
};
use crate::driver::QueryOperations;
use crate::error::{Error, Result};
use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
use crate::types::{EnqueueParams, NamedParams, OutParam, ScalarKind, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const PICKED_ID_PARAM: &str = "pickedId";
pub(crate) const PICKED_ATTEMPT_PARAM: &str = "pickedAttempt";

fn now_plus_delay() -> String {
    format!("CURRENT_TIMESTAMP + :{} * INTERVAL '1' SECOND", EXECUTION_DELAY_PARAM)
}

pub(crate) fn next_id_sql(sequence: &str) -> String {
    format!("SELECT {}.nextval FROM dual", sequence)
}

pub(crate) fn enqueue_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "INSERT INTO {table} ({id}, {queue}, {payload}, {next}, {attempt}, {reenqueue}, {total}{ext}) \
         VALUES (:id, :queueName, :payload, {now_plus}, 0, 0, 0{ext_values})",
        table = location.table_name(),
        id = schema.id_field(),
        queue = schema.queue_name_field(),
        payload = schema.payload_field(),
        next = schema.next_process_at_field(),
        attempt = schema.attempt_field(),
        reenqueue = schema.reenqueue_attempt_field(),
        total = schema.total_attempt_field(),
        ext = ext_columns(schema),
        now_plus = now_plus_delay(),
        ext_values = ext_placeholders(schema),
    )
}

pub(crate) fn reenqueue_sql_for(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    reenqueue_sql(schema, location, &now_plus_delay())
}

pub(crate) fn pick_lock_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "DECLARE CURSOR c IS SELECT {id}, {attempt} FROM {table} \
         WHERE {queue} = :queueName AND {next} <= CURRENT_TIMESTAMP \
         ORDER BY {id} ASC FOR UPDATE SKIP LOCKED; \
         BEGIN OPEN c; FETCH c INTO :{picked_id}, :{picked_attempt}; CLOSE c; END;",
        id = schema.id_field(),
        attempt = schema.attempt_field(),
        table = location.table_name(),
        queue = schema.queue_name_field(),
        next = schema.next_process_at_field(),
        picked_id = PICKED_ID_PARAM,
        picked_attempt = PICKED_ATTEMPT_PARAM,
    )
}

pub(crate) fn pick_claim_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "UPDATE {table} SET {assignments} WHERE {id} = :id",
        table = location.table_name(),
        assignments = claim_assignments(schema, &now_plus_delay()),
        id = schema.id_field(),
    )
}

pub(crate) fn pick_fetch_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "SELECT {columns} FROM {table} WHERE {id} = :id",
        columns = schema.task_columns().join(", "),
        table = location.table_name(),
        id = schema.id_field(),
    )
}

#[derive(Debug)]
pub struct OracleQueueDao {
    schema: Arc<QueueTableSchema>,
    next_id_sql: SqlCache<String>,
    enqueue_sql: SqlCache<QueueLocation>,
    delete_sql: SqlCache<QueueLocation>,
    reenqueue_sql: SqlCache<QueueLocation>,
}

impl OracleQueueDao {
    pub fn new(schema: Arc<QueueTableSchema>) -> Self {
        Self {
            schema,
            next_id_sql: SqlCache::new(),
            enqueue_sql: SqlCache::new(),
            delete_sql: SqlCache::new(),
            reenqueue_sql: SqlCache::new(),
        }
    }
}

#[async_trait]
impl QueueDao for OracleQueueDao {
    async fn enqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        params: &EnqueueParams,
    ) -> Result<i64> {
        let sequence = location
            .id_sequence()
            .ok_or_else(|| Error::MissingIdSequence {
                location: location.to_string(),
            })?;
        let mut named = enqueue_params(&self.schema, location, params)?;

        let next_id = self
            .next_id_sql
            .get_or_build(&sequence.to_string(), || next_id_sql(sequence));
        let id = ops
            .query_scalar(&next_id, ScalarKind::Int)
            .await?
            .and_then(|value| value.as_i64())
            .ok_or_else(|| Error::Internal {
                message: format!("sequence {} returned no value", sequence),
            })?;

        let sql = self.enqueue_sql.get_or_build(location, || {
            tracing::debug!(%location, "building oracle enqueue statement");
            enqueue_sql(&self.schema, location)
        });
        named.insert(ID_PARAM, id);
        ops.update(&sql, &named).await?;
        Ok(id)
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
pub struct OraclePickTaskDao {
    schema: Arc<QueueTableSchema>,
    location: QueueLocation,
    failure: Arc<dyn FailureSettings>,
    lock_sql: String,
    claim_sql: String,
    fetch_sql: String,
    outputs: [OutParam; 2],
}

impl OraclePickTaskDao {
    pub fn new(
        schema: Arc<QueueTableSchema>,
        location: QueueLocation,
        failure: Arc<dyn FailureSettings>,
    ) -> Self {
        let lock_sql = pick_lock_sql(&schema, &location);
        let claim_sql = pick_claim_sql(&schema, &location);
        let fetch_sql = pick_fetch_sql(&schema, &location);
        Self {
            schema,
            location,
            failure,
            lock_sql,
            claim_sql,
            fetch_sql,
            outputs: [
                OutParam::new(PICKED_ID_PARAM, ScalarKind::Int),
                OutParam::new(PICKED_ATTEMPT_PARAM, ScalarKind::Int),
            ],
        }
    }
}

#[async_trait]
impl QueuePickTaskDao for OraclePickTaskDao {
    async fn pick_task(&self, ops: &mut dyn QueryOperations) -> Result<Option<TaskRecord>> {
        let lock_params =
            NamedParams::new().with(QUEUE_NAME_PARAM, self.location.queue_id().as_str());
        let picked = ops.call(&self.lock_sql, &lock_params, &self.outputs).await?;
        let Some(task_id) = picked.get_opt_i64(PICKED_ID_PARAM)? else {
            tracing::debug!(location = %self.location, "no eligible task");
            return Ok(None);
        };
        let attempt = picked.get_opt_i64(PICKED_ATTEMPT_PARAM)?.unwrap_or(0);

        let params = claim_params(&self.location, task_id, self.failure.as_ref(), attempt);
        ops.update(&self.claim_sql, &params).await?;
        let rows = ops.query_rows(&self.fetch_sql, &params).await?;
        let task = rows
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
