//! # dbqueue
//!
//! **dbqueue** is the data-access layer of a database-backed task queue. It maps queue
//! operations onto dialect-specific SQL for PostgreSQL, SQL Server, Oracle 11g and
//! SQLite, and relies on the engine's transactional row locks so that concurrent
//! pollers never hold the same task.
//!
//! ## Features
//!
//! - **Enqueue / delete / reenqueue** with SQL generated once per queue location.
//! - **Pick-task** that locks and claims one eligible row per call: `SKIP LOCKED` where
//!   the engine has it, candidates locked in id order where it does not.
//! - **Customizable tables**: physical column names and extension columns come from a
//!   [`QueueTableSchema`], and several queues may share one table.
//! - **Driver-agnostic**: DAOs talk to the narrow [`driver::QueryOperations`] interface.
//!   sqlx adapters for PostgreSQL and SQLite ship behind the `postgres` and `sqlite`
//!   features.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbqueue::driver::sqlite::SqliteDriver;
//! use dbqueue::settings::{FailureSettingsPolicy, QueueLocation, QueueTableSchema};
//! use dbqueue::{DatabaseAccessLayer, DatabaseDialect, QueueDao, QueuePickTaskDao};
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
//! let picker = dal.create_pick_task_dao(location.clone(), Arc::new(FailureSettingsPolicy::default()));
//!
//! // One polling iteration: claim a task and resolve it in the same transaction.
//! let queue_dao = dal.queue_dao().clone();
//! dal.transact_void(move |ops| {
//!     Box::pin(async move {
//!         if let Some(task) = picker.pick_task(ops).await? {
//!             println!("processing {}", task);
//!             queue_dao.delete_task(ops, &location, task.id).await?;
//!         }
//!         Ok::<_, dbqueue::Error>(())
//!     })
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dal;
pub mod dao;
pub mod driver;
pub mod error;
pub mod settings;
pub mod types;

pub use crate::config::{Config, QueueConfig};
pub use crate::dal::{
    render_statements, DatabaseAccessLayer, DatabaseDialect, PickTaskDaoKind, QueueDaoKind,
    RenderedStatement,
};
pub use crate::dao::{QueueDao, QueuePickTaskDao, SqlOperation, MAX_EXECUTION_DELAY};
pub use crate::error::{Error, Result};
pub use crate::settings::{FailureSettings, QueueLocation, QueueTableSchema};
pub use crate::types::{EnqueueParams, TaskRecord};
