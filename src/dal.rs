//! Database access facade.
//!
//! ## What
//!
//! - [`DatabaseDialect`] is the closed set of supported engines.
//! - [`QueueDaoKind`] / [`PickTaskDaoKind`] dispatch to the per-dialect DAOs.
//! - [`DatabaseAccessLayer`] binds a dialect, a table schema and a driver, and scopes
//!   units of work in transactions.
//!
//! ## How
//!
//! ```rust,no_run
//! use dbqueue::driver::sqlite::SqliteDriver;
//! use dbqueue::settings::{FailureSettingsPolicy, QueueLocation, QueueTableSchema};
//! use dbqueue::types::EnqueueParams;
//! use dbqueue::{DatabaseAccessLayer, DatabaseDialect, QueueDao};
//! use std::sync::Arc;
//!
//! # async fn example() -> dbqueue::error::Result<()> {
//! let driver = SqliteDriver::connect("sqlite://queue.db").await?;
//! let dal = DatabaseAccessLayer::new(
//!     DatabaseDialect::Embedded,
//!     QueueTableSchema::default(),
//!     Arc::new(driver),
//! );
//! let location = QueueLocation::builder()
//!     .with_table_name("tasks")
//!     .with_queue_id("mail")
//!     .build()?;
//!
//! let dao = dal.queue_dao().clone();
//! let id = dal
//!     .transact(move |ops| {
//!         Box::pin(async move {
//!             dao.enqueue(ops, &location, &EnqueueParams::new().with_payload("hi")).await
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::dao::mssql::{self, MssqlPickTaskDao, MssqlQueueDao};
use crate::dao::oracle::{self, OraclePickTaskDao, OracleQueueDao};
use crate::dao::postgres::{self, PostgresPickTaskDao, PostgresQueueDao};
use crate::dao::sqlite::{self, SqlitePickTaskDao, SqliteQueueDao};
use crate::dao::{delete_sql, QueueDao, QueuePickTaskDao, SqlOperation};
use crate::driver::{PlaceholderStyle, QueryOperations, TransactionOperations};
use crate::error::{Error, Result};
use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
use crate::types::{EnqueueParams, TaskRecord};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseDialect {
    /// PostgreSQL: identity ids, `SKIP LOCKED`.
    StandardSql,
    /// Microsoft SQL Server: `OUTPUT inserted`, `READPAST` hints.
    Mssql,
    /// Oracle 11g: ids from a sequence, PL/SQL locking cursor.
    LegacySequence,
    /// SQLite: no row locks, candidates locked before the pick.
    Embedded,
}

impl DatabaseDialect {
    pub const ALL: [DatabaseDialect; 4] = [
        DatabaseDialect::StandardSql,
        DatabaseDialect::Mssql,
        DatabaseDialect::LegacySequence,
        DatabaseDialect::Embedded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatabaseDialect::StandardSql => "standard_sql",
            DatabaseDialect::Mssql => "mssql",
            DatabaseDialect::LegacySequence => "legacy_sequence",
            DatabaseDialect::Embedded => "embedded",
        }
    }

    pub fn supports_skip_locked(&self) -> bool {
        !matches!(self, DatabaseDialect::Embedded)
    }

    pub fn requires_id_sequence(&self) -> bool {
        matches!(self, DatabaseDialect::LegacySequence)
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            DatabaseDialect::StandardSql => PlaceholderStyle::Dollar,
            DatabaseDialect::Mssql => PlaceholderStyle::AtP,
            DatabaseDialect::LegacySequence => PlaceholderStyle::ColonNumber,
            DatabaseDialect::Embedded => PlaceholderStyle::Question,
        }
    }
}

impl fmt::Display for DatabaseDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatabaseDialect {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "standard_sql" | "postgresql" | "postgres" => Ok(DatabaseDialect::StandardSql),
            "mssql" | "sqlserver" | "sql_server" => Ok(DatabaseDialect::Mssql),
            "legacy_sequence" | "oracle_11g" | "oracle" => Ok(DatabaseDialect::LegacySequence),
            "embedded" | "sqlite" => Ok(DatabaseDialect::Embedded),
            _ => Err(Error::UnsupportedDialect {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueueDaoKind {
    Postgres(Arc<PostgresQueueDao>),
    Mssql(Arc<MssqlQueueDao>),
    Oracle(Arc<OracleQueueDao>),
    Sqlite(Arc<SqliteQueueDao>),
}

impl QueueDaoKind {
    pub fn new(dialect: DatabaseDialect, schema: Arc<QueueTableSchema>) -> Self {
        match dialect {
            DatabaseDialect::StandardSql => {
                QueueDaoKind::Postgres(Arc::new(PostgresQueueDao::new(schema)))
            }
            DatabaseDialect::Mssql => QueueDaoKind::Mssql(Arc::new(MssqlQueueDao::new(schema))),
            DatabaseDialect::LegacySequence => {
                QueueDaoKind::Oracle(Arc::new(OracleQueueDao::new(schema)))
            }
            DatabaseDialect::Embedded => {
                QueueDaoKind::Sqlite(Arc::new(SqliteQueueDao::new(schema)))
            }
        }
    }
}

#[async_trait]
impl QueueDao for QueueDaoKind {
    async fn enqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        params: &EnqueueParams,
    ) -> Result<i64> {
        match self {
            QueueDaoKind::Postgres(dao) => dao.enqueue(ops, location, params).await,
            QueueDaoKind::Mssql(dao) => dao.enqueue(ops, location, params).await,
            QueueDaoKind::Oracle(dao) => dao.enqueue(ops, location, params).await,
            QueueDaoKind::Sqlite(dao) => dao.enqueue(ops, location, params).await,
        }
    }

    async fn delete_task(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
    ) -> Result<bool> {
        match self {
            QueueDaoKind::Postgres(dao) => dao.delete_task(ops, location, task_id).await,
            QueueDaoKind::Mssql(dao) => dao.delete_task(ops, location, task_id).await,
            QueueDaoKind::Oracle(dao) => dao.delete_task(ops, location, task_id).await,
            QueueDaoKind::Sqlite(dao) => dao.delete_task(ops, location, task_id).await,
        }
    }

    async fn reenqueue(
        &self,
        ops: &mut dyn QueryOperations,
        location: &QueueLocation,
        task_id: i64,
        execution_delay: Duration,
    ) -> Result<bool> {
        match self {
            QueueDaoKind::Postgres(dao) => {
                dao.reenqueue(ops, location, task_id, execution_delay).await
            }
            QueueDaoKind::Mssql(dao) => dao.reenqueue(ops, location, task_id, execution_delay).await,
            QueueDaoKind::Oracle(dao) => dao.reenqueue(ops, location, task_id, execution_delay).await,
            QueueDaoKind::Sqlite(dao) => dao.reenqueue(ops, location, task_id, execution_delay).await,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PickTaskDaoKind {
    Postgres(Arc<PostgresPickTaskDao>),
    Mssql(Arc<MssqlPickTaskDao>),
    Oracle(Arc<OraclePickTaskDao>),
    Sqlite(Arc<SqlitePickTaskDao>),
}

impl PickTaskDaoKind {
    pub fn new(
        dialect: DatabaseDialect,
        schema: Arc<QueueTableSchema>,
        location: QueueLocation,
        failure: Arc<dyn FailureSettings>,
    ) -> Self {
        match dialect {
            DatabaseDialect::StandardSql => PickTaskDaoKind::Postgres(Arc::new(
                PostgresPickTaskDao::new(schema, location, failure),
            )),
            DatabaseDialect::Mssql => {
                PickTaskDaoKind::Mssql(Arc::new(MssqlPickTaskDao::new(schema, location, failure)))
            }
            DatabaseDialect::LegacySequence => PickTaskDaoKind::Oracle(Arc::new(
                OraclePickTaskDao::new(schema, location, failure),
            )),
            DatabaseDialect::Embedded => PickTaskDaoKind::Sqlite(Arc::new(
                SqlitePickTaskDao::new(schema, location, failure),
            )),
        }
    }
}

#[async_trait]
impl QueuePickTaskDao for PickTaskDaoKind {
    async fn pick_task(&self, ops: &mut dyn QueryOperations) -> Result<Option<TaskRecord>> {
        match self {
            PickTaskDaoKind::Postgres(dao) => dao.pick_task(ops).await,
            PickTaskDaoKind::Mssql(dao) => dao.pick_task(ops).await,
            PickTaskDaoKind::Oracle(dao) => dao.pick_task(ops).await,
            PickTaskDaoKind::Sqlite(dao) => dao.pick_task(ops).await,
        }
    }

    fn location(&self) -> &QueueLocation {
        match self {
            PickTaskDaoKind::Postgres(dao) => dao.location(),
            PickTaskDaoKind::Mssql(dao) => dao.location(),
            PickTaskDaoKind::Oracle(dao) => dao.location(),
            PickTaskDaoKind::Sqlite(dao) => dao.location(),
        }
    }
}

/// Entry point for a poller: DAOs for one dialect plus transaction scoping.
#[derive(Clone)]
pub struct DatabaseAccessLayer {
    dialect: DatabaseDialect,
    schema: Arc<QueueTableSchema>,
    driver: Arc<dyn TransactionOperations>,
    queue_dao: QueueDaoKind,
}

impl fmt::Debug for DatabaseAccessLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseAccessLayer")
            .field("dialect", &self.dialect)
            .field("schema", &self.schema)
            .field("driver", &self.driver.driver_name())
            .finish()
    }
}

impl DatabaseAccessLayer {
    pub fn new(
        dialect: DatabaseDialect,
        schema: QueueTableSchema,
        driver: Arc<dyn TransactionOperations>,
    ) -> Self {
        let schema = Arc::new(schema);
        tracing::debug!(%dialect, driver = driver.driver_name(), "creating database access layer");
        Self {
            dialect,
            queue_dao: QueueDaoKind::new(dialect, Arc::clone(&schema)),
            schema,
            driver,
        }
    }

    /// Build from configuration. An unknown dialect name fails here, not on first use.
    pub fn from_config(config: &Config, driver: Arc<dyn TransactionOperations>) -> Result<Self> {
        let dialect = config.dialect()?;
        Ok(Self::new(dialect, config.schema.clone(), driver))
    }

    pub fn queue_dao(&self) -> &QueueDaoKind {
        &self.queue_dao
    }

    pub fn create_pick_task_dao(
        &self,
        location: QueueLocation,
        failure: Arc<dyn FailureSettings>,
    ) -> PickTaskDaoKind {
        PickTaskDaoKind::new(self.dialect, Arc::clone(&self.schema), location, failure)
    }

    pub fn dialect(&self) -> DatabaseDialect {
        self.dialect
    }

    pub fn schema(&self) -> &QueueTableSchema {
        &self.schema
    }

    /// Run `unit_of_work` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The error of the unit of work is returned unchanged; a failing rollback is only
    /// logged. A failing commit is reported as [`Error::TransactionFailed`]. The closure gets the transaction's operations and returns a boxed future,
    /// so DAOs and locations are moved in as owned clones.
    pub async fn transact<T, F>(&self, unit_of_work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut dyn QueryOperations) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut scope = self.driver.begin().await?;
        let outcome = unit_of_work(scope.operations()).await;
        match outcome {
            Ok(value) => {
                scope
                    .commit()
                    .await
                    .map_err(|err| Error::TransactionFailed {
                        source: Box::new(err),
                        context: "commit".to_string(),
                    })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed after {}", err);
                }
                Err(err)
            }
        }
    }

    pub async fn transact_void<F>(&self, unit_of_work: F) -> Result<()>
    where
        F: for<'c> FnOnce(&'c mut dyn QueryOperations) -> BoxFuture<'c, Result<()>> + Send,
    {
        self.transact(unit_of_work).await
    }
}

/// One generated statement, as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStatement {
    pub queue_id: String,
    pub operation: SqlOperation,
    pub sql: String,
}

/// Every statement `dialect` issues for `location`, in execution order.
pub fn render_statements(
    dialect: DatabaseDialect,
    schema: &QueueTableSchema,
    location: &QueueLocation,
) -> Vec<RenderedStatement> {
    let statements: Vec<(SqlOperation, String)> = match dialect {
        DatabaseDialect::StandardSql => vec![
            (SqlOperation::Enqueue, postgres::enqueue_sql(schema, location)),
            (SqlOperation::Delete, delete_sql(schema, location)),
            (SqlOperation::Reenqueue, postgres::reenqueue_sql_for(schema, location)),
            (SqlOperation::PickLock, postgres::pick_lock_sql(schema, location)),
            (SqlOperation::PickClaim, postgres::pick_claim_sql(schema, location)),
        ],
        DatabaseDialect::Mssql => vec![
            (SqlOperation::Enqueue, mssql::enqueue_sql(schema, location)),
            (SqlOperation::Delete, delete_sql(schema, location)),
            (SqlOperation::Reenqueue, mssql::reenqueue_sql_for(schema, location)),
            (SqlOperation::PickLock, mssql::pick_lock_sql(schema, location)),
            (SqlOperation::PickClaim, mssql::pick_claim_sql(schema, location)),
        ],
        DatabaseDialect::LegacySequence => {
            let mut statements = Vec::with_capacity(6);
            if let Some(sequence) = location.id_sequence() {
                statements.push((SqlOperation::NextId, oracle::next_id_sql(sequence)));
            }
            statements.extend([
                (SqlOperation::Enqueue, oracle::enqueue_sql(schema, location)),
                (SqlOperation::Delete, delete_sql(schema, location)),
                (SqlOperation::Reenqueue, oracle::reenqueue_sql_for(schema, location)),
                (SqlOperation::PickLock, oracle::pick_lock_sql(schema, location)),
                (SqlOperation::PickClaim, oracle::pick_claim_sql(schema, location)),
                (SqlOperation::PickFetch, oracle::pick_fetch_sql(schema, location)),
            ]);
            statements
        }
        DatabaseDialect::Embedded => vec![
            (SqlOperation::Enqueue, sqlite::enqueue_sql(schema, location)),
            (SqlOperation::Delete, delete_sql(schema, location)),
            (SqlOperation::Reenqueue, sqlite::reenqueue_sql_for(schema, location)),
            (SqlOperation::PickLock, sqlite::pick_lock_sql(schema, location)),
            (SqlOperation::PickSelect, sqlite::pick_select_sql(schema, location)),
            (SqlOperation::PickClaim, sqlite::pick_claim_sql(schema, location)),
        ],
    };

    statements
        .into_iter()
        .map(|(operation, sql)| RenderedStatement {
            queue_id: location.queue_id().to_string(),
            operation,
            sql,
        })
        .collect()
}
