#![allow(dead_code)]

use dbqueue::settings::{QueueLocation, QueueTableSchema};

pub const TASKS_TABLE: &str = "tasks";

/// Queue table matching the default schema plus a `tenant` extension column.
pub const SQLITE_TASKS_DDL: &str = "CREATE TABLE tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    next_process_at TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    reenqueue_attempt INTEGER NOT NULL DEFAULT 0,
    total_attempt INTEGER NOT NULL DEFAULT 0,
    tenant TEXT
)";

pub const POSTGRES_TASKS_DDL: &str = "CREATE TABLE IF NOT EXISTS dbqueue_test_tasks (
    id BIGSERIAL PRIMARY KEY,
    queue_name TEXT NOT NULL,
    payload TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    next_process_at TIMESTAMPTZ NOT NULL,
    attempt BIGINT NOT NULL DEFAULT 0,
    reenqueue_attempt BIGINT NOT NULL DEFAULT 0,
    total_attempt BIGINT NOT NULL DEFAULT 0,
    tenant TEXT
)";

/// Extension columns of several types, none of them text.
pub const POSTGRES_TYPED_TASKS_DDL: &str = "CREATE TABLE IF NOT EXISTS dbqueue_test_typed_tasks (
    id BIGSERIAL PRIMARY KEY,
    queue_name TEXT NOT NULL,
    payload TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    next_process_at TIMESTAMPTZ NOT NULL,
    attempt BIGINT NOT NULL DEFAULT 0,
    reenqueue_attempt BIGINT NOT NULL DEFAULT 0,
    total_attempt BIGINT NOT NULL DEFAULT 0,
    priority BIGINT,
    deadline TIMESTAMPTZ
)";

pub fn location(table: &str, queue_id: &str) -> QueueLocation {
    QueueLocation::builder()
        .with_table_name(table)
        .with_queue_id(queue_id)
        .build()
        .expect("valid location")
}

pub fn location_with_sequence(table: &str, queue_id: &str, sequence: &str) -> QueueLocation {
    QueueLocation::builder()
        .with_table_name(table)
        .with_queue_id(queue_id)
        .with_id_sequence(Some(sequence))
        .build()
        .expect("valid location")
}

pub fn tenant_schema() -> QueueTableSchema {
    QueueTableSchema::builder().with_ext_fields(["tenant"]).build().unwrap()
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::SQLITE_TASKS_DDL;
    use dbqueue::driver::sqlite::SqliteDriver;
    use dbqueue::driver::QueryOperations;
    use dbqueue::types::NamedParams;
    use tempfile::TempDir;

    /// File-backed database in a fresh temp dir, with the tasks table created.
    ///
    /// The `TempDir` must outlive the driver.
    pub async fn sqlite_driver() -> (TempDir, SqliteDriver) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("queue.db");
        let dsn = format!("sqlite://{}?mode=rwc", path.display());
        let mut driver = SqliteDriver::connect(&dsn)
            .await
            .expect("Failed to open sqlite database");
        driver
            .update(SQLITE_TASKS_DDL, &NamedParams::new())
            .await
            .expect("Failed to create tasks table");
        (dir, driver)
    }

    /// Make every row of the table eligible again.
    pub async fn make_all_due(driver: &SqliteDriver) {
        let mut driver = driver.clone();
        driver
            .update(
                "UPDATE tasks SET next_process_at = datetime('now', '-1 seconds')",
                &NamedParams::new(),
            )
            .await
            .expect("Failed to reschedule tasks");
    }
}
