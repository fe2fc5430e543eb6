//! Queue data-access objects, one pair per dialect.
//!
//! ## What
//!
//! - [`QueueDao`]: enqueue, delete and reenqueue against a [`QueueLocation`].
//! - [`QueuePickTaskDao`]: lock and claim the next eligible task of one location.
//! - [`SqlCache`]: lazily populated SQL text, keyed by location or sequence name.
//!
//! ## How
//!
//! Every call takes the [`QueryOperations`] to run on, so the same DAO serves any
//! transaction the caller opened. Zero affected rows on delete or reenqueue is a
//! `false`, not an error: another worker already resolved the task.

use crate::driver::QueryOperations;
use crate::error::{Error, Result};
use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
use crate::types::{EnqueueParams, NamedParams, SqlValue, TaskRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub mod mssql;
pub mod oracle;
pub mod postgres;
pub mod sqlite;

pub(crate) const QUEUE_NAME_PARAM: &str = "queueName";
pub(crate) const PAYLOAD_PARAM: &str = "payload";
pub(crate) const EXECUTION_DELAY_PARAM: &str = "executionDelay";
pub(crate) const ID_PARAM: &str = "id";

/// Longest delay ever written to a row, about 50 years.
///
/// Stays inside SQLite's `datetime()` range and DATEADD's `int` argument. Longer
/// delays, including a saturated backoff, are clamped to it.
pub const MAX_EXECUTION_DELAY: Duration = Duration::from_secs(50 * 365 * 24 * 60 * 60);

#[async_trait]
pub trait QueueDao: Send + Sync {
    /// Insert a task and return its id.
    async fn enqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        params: &EnqueueParams,
    ) -> Result<i64>;

    /// Delete a task. `false` when no row matched.
    async fn delete_task(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
    ) -> Result<bool>;

    /// Schedule a task again after `execution_delay`, resetting its attempt counter.
    /// `false` when no row matched.
    async fn reenqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
        execution_delay: Duration,
    ) -> Result<bool>;
}

#[async_trait]
pub trait QueuePickTaskDao: Send + Sync {
    /// Lock the next eligible task and claim it for this transaction.
    ///
    /// Must run in the transaction that will later delete or reenqueue the task.
    async fn pick_task(&self, ops: &mut dyn QueryOperations) -> Result<Option<TaskRecord>>;

    fn location(&self) -> &QueueLocation;
}

/// Statement kinds produced by the DAOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlOperation {
    NextId,
    Enqueue,
    Delete,
    Reenqueue,
    PickLock,
    PickSelect,
    PickClaim,
    PickFetch,
}

impl SqlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::NextId => "next_id",
            SqlOperation::Enqueue => "enqueue",
            SqlOperation::Delete => "delete",
            SqlOperation::Reenqueue => "reenqueue",
            SqlOperation::PickLock => "pick_lock",
            SqlOperation::PickSelect => "pick_select",
            SqlOperation::PickClaim => "pick_claim",
            SqlOperation::PickFetch => "pick_fetch",
        }
    }
}

impl fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memoized SQL text.
///
/// Entries are never evicted: keys come from configuration, not from traffic. Two
/// threads missing the same key may both build it; the first insert wins and the
/// texts are identical anyway.
#[derive(Debug)]
pub struct SqlCache<K> {
    entries: RwLock<HashMap<K, Arc<str>>>,
    builds: AtomicUsize,
}

impl<K> Default for SqlCache<K> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone> SqlCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<F>(&self, key: &K, build: F) -> Arc<str>
    where
        F: FnOnce() -> String,
    {
        {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(sql) = entries.get(key) {
                return Arc::clone(sql);
            }
        }

        let sql: Arc<str> = build().into();
        self.builds.fetch_add(1, Ordering::Relaxed);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(entries.entry(key.clone()).or_insert(sql))
    }

    /// Number of times a statement was generated.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn ext_param(field: &str) -> String {
    QueueTableSchema::ext_param(field)
}

/// `, a, b` for a non-empty list, empty otherwise.
pub(crate) fn trailing_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .fold(String::new(), |mut out, item| {
            out.push_str(", ");
            out.push_str(item.as_ref());
            out
        })
}

pub(crate) fn ext_columns(schema: &QueueTableSchema) -> String {
    trailing_list(schema.ext_fields())
}

pub(crate) fn ext_placeholders(schema: &QueueTableSchema) -> String {
    trailing_list(
        schema
            .ext_fields()
            .iter()
            .map(|field| format!(":{}", ext_param(field))),
    )
}

pub(crate) fn delay_seconds(delay: Duration) -> i64 {
    let secs = delay.min(MAX_EXECUTION_DELAY).as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Parameters of an enqueue: queue name, payload, delay and every extension field,
/// NULL where the caller supplied nothing.
pub(crate) fn enqueue_params(
    schema: &QueueTableSchema,
    location: &QueueLocation,
    params: &EnqueueParams,
) -> Result<NamedParams> {
    if let Some(field) = params
        .ext_data()
        .keys()
        .find(|field| !schema.has_ext_field(field))
    {
        return Err(Error::InvalidExtField {
            field: field.clone(),
        });
    }

    let mut named = NamedParams::new()
        .with(QUEUE_NAME_PARAM, location.queue_id().as_str())
        .with(PAYLOAD_PARAM, params.payload())
        .with(EXECUTION_DELAY_PARAM, delay_seconds(params.execution_delay()));
    for field in schema.ext_fields() {
        let value = params
            .ext_data()
            .get(field)
            .cloned()
            .unwrap_or(SqlValue::Null);
        named.insert(ext_param(field), value);
    }
    Ok(named)
}

pub(crate) fn task_params(location: &QueueLocation, task_id: i64) -> NamedParams {
    NamedParams::new()
        .with(ID_PARAM, task_id)
        .with(QUEUE_NAME_PARAM, location.queue_id().as_str())
}

pub(crate) fn delete_sql(schema: &QueueTableSchema, location: &QueueLocation) -> String {
    format!(
        "DELETE FROM {} WHERE {} = :queueName AND {} = :id",
        location.table_name(),
        schema.queue_name_field(),
        schema.id_field()
    )
}

/// `UPDATE ... SET next_process_at = <now_plus>, attempt = 0, reenqueue_attempt + 1`.
pub(crate) fn reenqueue_sql(
    schema: &QueueTableSchema,
    location: &QueueLocation,
    now_plus_delay: &str,
) -> String {
    format!(
        "UPDATE {table} SET {next} = {now_plus_delay}, {attempt} = 0, {reenqueue} = {reenqueue} + 1 \
         WHERE {id} = :id AND {queue} = :queueName",
        table = location.table_name(),
        next = schema.next_process_at_field(),
        attempt = schema.attempt_field(),
        reenqueue = schema.reenqueue_attempt_field(),
        id = schema.id_field(),
        queue = schema.queue_name_field(),
    )
}

/// `SET` clause of a claim: in-flight counters plus the fallback schedule.
pub(crate) fn claim_assignments(schema: &QueueTableSchema, now_plus_delay: &str) -> String {
    format!(
        "{next} = {now_plus_delay}, {attempt} = {attempt} + 1, {total} = {total} + 1",
        next = schema.next_process_at_field(),
        attempt = schema.attempt_field(),
        total = schema.total_attempt_field(),
    )
}

/// Delay applied to a claimed task should it never be resolved.
pub(crate) fn claim_delay(failure: &dyn FailureSettings, current_attempt: i64) -> Duration {
    let next_attempt = current_attempt.saturating_add(1).clamp(1, i64::from(u32::MAX));
    failure.next_delay(next_attempt as u32)
}

pub(crate) fn claim_params(
    location: &QueueLocation,
    task_id: i64,
    failure: &dyn FailureSettings,
    current_attempt: i64,
) -> NamedParams {
    task_params(location, task_id).with(
        EXECUTION_DELAY_PARAM,
        delay_seconds(claim_delay(failure, current_attempt)),
    )
}

pub(crate) fn updated(count: u64) -> bool {
    count != 0
}

pub(crate) fn missing_id(location: &QueueLocation) -> Error {
    Error::Internal {
        message: format!("enqueue into {} returned no id", location),
    }
}
