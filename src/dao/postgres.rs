//! PostgreSQL queue DAOs.
//!
//! Ids come from the column default (or `nextval` when the location names a sequence)
//! and are read back with `RETURNING`. Picking relies on `FOR UPDATE SKIP LOCKED`.

use super::{
    claim_assignments, claim_params, delete_sql, enqueue_params, ext_columns, ext_placeholders,
    missing_id, reenqueue_sql, task_params, updated, QueueDao, QueuePickTaskDao, SqlCache,
    EXECUTION_DELAY_PARAM,
};
use crate::driver::QueryOperations;
use crate::error::Result;
use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
use crate::types::{EnqueueParams, NamedParams, ScalarKind, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

fn now_plus_delay() -> String {
    format!("now() + :{} * INTERVAL '1 SECOND'", EXECUTION_DELAY_PARAM)
}

pub(crate) fn enqueue_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    let (id_column, id_value) = match location.id_sequence() {
        Some(sequence) => (
            format!("{}, ", schema.id_field()),
            format!("nextval('{}'), ", sequence),
        ),
        None => (String::new(), String::new()),
    };
    format!(
        "INSERT INTO {table} ({id_column}{queue}, {payload}, {next}, {attempt}, {reenqueue}, {total}{ext}) \
         VALUES ({id_value}:queueName, :payload, {now_plus}, 0, 0, 0{ext_values}) RETURNING {id}",
        table = location.table_name(),
        queue = schema.queue_name_field(),
        payload = schema.payload_field(),
        next = schema.next_process_at_field(),
        attempt = schema.attempt_field(),
        reenqueue = schema.reenqueue_attempt_field(),
        total = schema.total_attempt_field(),
        ext = ext_columns(schema),
        now_plus = now_plus_delay(),
        ext_values = ext_placeholders(schema),
        id = schema.id_field(),
    )
}

pub(crate) fn reenqueue_sql_for(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    reenqueue_sql(schema, location, &now_plus_delay())
}

pub(crate) fn pick_lock_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "SELECT {id}, {attempt} FROM {table} WHERE {queue} = :queueName AND {next} <= now() \
         ORDER BY {id} ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        id = schema.id_field(),
        attempt = schema.attempt_field(),
        table = location.table_name(),
        queue = schema.queue_name_field(),
        next = schema.next_process_at_field(),
    )
}

pub(crate) fn pick_claim_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "UPDATE {table} SET {assignments} WHERE {id} = :id RETURNING {columns}",
        table = location.table_name(),
        assignments = claim_assignments(schema, &now_plus_delay()),
        id = schema.id_field(),
        columns = schema.task_columns().join(", "),
    )
}

#[derive(Debug)]
pub struct PostgresQueueDao {
    schema: Arc<QueueTableSchema>,
    enqueue_sql: SqlCache<QueueLocation>,
    delete_sql: SqlCache<QueueLocation>,
    reenqueue_sql: SqlCache<QueueLocation>,
}

impl PostgresQueueDao {
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
impl QueueDao for PostgresQueueDao {
    async fn enqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        params: &EnqueueParams,
    ) -> Result<i64> {
        let named = enqueue_params(&self.schema, location, params)?;
        let sql = self.enqueue_sql.get_or_build(location, || {
            tracing::debug!(%location, "building postgres enqueue statement");
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
        let count = ops.update(&sql, &task_params(location, task_id)).await?;
        Ok(updated(count))
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
            .with(EXECUTION_DELAY_PARAM, super::delay_seconds(execution_delay));
        let count = ops.update(&sql, &params).await?;
        Ok(updated(count))
    }
}

#[derive(Debug)]
pub struct PostgresPickTaskDao {
    schema: Arc<QueueTableSchema>,
    location: QueueLocation,
    failure: Arc<dyn FailureSettings>,
    lock_sql: String,
    claim_sql: String,
}

impl PostgresPickTaskDao {
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
impl QueuePickTaskDao for PostgresPickTaskDao {
    async fn pick_task(&self, ops: &mut dyn QueryOperations) -> Result<Option<TaskRecord>> {
        let lock_params =
            NamedParams::new().with(super::QUEUE_NAME_PARAM, self.location.queue_id().as_str());
        let candidate = ops.query_rows(&self.lock_sql, &lock_params).await?;
        let Some(row) = candidate.first() else {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{RecordingDriver, ScriptedResponse, StatementKind};
    use crate::settings::FailureSettingsPolicy;
    use crate::types::{SqlRow, SqlValue};

    fn location() -> QueueLocation {
        QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("mail")
            .build()
            .unwrap()
    }

    fn schema() -> Arc<QueueTableSchema> {
        Arc::new(QueueTableSchema::builder().with_ext_fields(["tenant"]).build().unwrap())
    }

    #[test]
    fn test_enqueue_sql_with_sequence() {
        let location = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("mail")
            .with_id_sequence(Some("tasks_seq"))
            .build()
            .unwrap();
        let sql = enqueue_sql(&QueueTableSchema::default(), &location);
        assert!(sql.starts_with("INSERT INTO tasks (id, queue_name,"));
        assert!(sql.contains("VALUES (nextval('tasks_seq'), :queueName"));
        assert!(sql.ends_with("RETURNING id"));
    }

    #[tokio::test]
    async fn test_enqueue_statement_is_built_once() {
        let dao = PostgresQueueDao::new(schema());
        let mut driver = RecordingDriver::new();
        for id in 1..=5 {
            driver.respond(ScriptedResponse::Scalar(Some(SqlValue::Int(id))));
        }

        for expected in 1..=5 {
            let id = dao
                .enqueue(&mut driver, &location(), &EnqueueParams::new().with_payload("p"))
                .await
                .unwrap();
            assert_eq!(id, expected);
        }

        assert_eq!(dao.enqueue_sql.builds(), 1);
        let statements = driver.statements();
        assert_eq!(statements.len(), 5);
        assert_eq!(statements[0].params.get("tenant"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_delete_reports_affected_rows() {
        let dao = PostgresQueueDao::new(schema());
        let mut driver = RecordingDriver::new();
        driver.respond(ScriptedResponse::Updated(1));
        driver.respond(ScriptedResponse::Updated(0));

        assert!(dao.delete_task(&mut driver, &location(), 3).await.unwrap());
        assert!(!dao.delete_task(&mut driver, &location(), 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_pick_claims_locked_row() {
        let failure = Arc::new(FailureSettingsPolicy::default());
        let dao = PostgresPickTaskDao::new(schema(), location(), failure);
        let mut driver = RecordingDriver::new();
        driver.respond(ScriptedResponse::Rows(vec![SqlRow::new()
            .with("id", 11i64)
            .with("attempt", 1i64)]));
        driver.respond(ScriptedResponse::Rows(vec![SqlRow::new()
            .with("id", 11i64)
            .with("payload", "p")
            .with("attempt", 2i64)
            .with("reenqueue_attempt", 0i64)
            .with("total_attempt", 2i64)
            .with("created_at", "2024-05-01 10:00:00")
            .with("next_process_at", "2024-05-01 10:02:00")
            .with("tenant", SqlValue::Null)]));

        let task = dao.pick_task(&mut driver).await.unwrap().unwrap();
        assert_eq!(task.id, 11);
        assert_eq!(task.attempts_count, 2);

        let statements = driver.statements();
        assert!(statements[0].sql.ends_with("FOR UPDATE SKIP LOCKED"));
        assert_eq!(statements[1].kind, StatementKind::Rows);
        // Second attempt under the default geometric policy: 60s * 2.
        assert_eq!(
            statements[1].params.get("executionDelay"),
            Some(&SqlValue::Int(120))
        );
    }

    #[tokio::test]
    async fn test_pick_without_candidates() {
        let failure = Arc::new(FailureSettingsPolicy::default());
        let dao = PostgresPickTaskDao::new(schema(), location(), failure);
        let mut driver = RecordingDriver::new();

        assert!(dao.pick_task(&mut driver).await.unwrap().is_none());
        assert_eq!(driver.statements().len(), 1);
    }
}
