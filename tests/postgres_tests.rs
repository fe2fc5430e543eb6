//! Runs against a live server named by DBQUEUE_TEST_POSTGRES_DSN; skipped when unset.
#![cfg(feature = "postgres")]

use dbqueue::driver::postgres::PgDriver;
use dbqueue::driver::{QueryOperations, TransactionOperations};
use dbqueue::settings::{FailureSettingsPolicy, QueueLocation, QueueTableSchema};
use dbqueue::types::{EnqueueParams, NamedParams, SqlValue};
use dbqueue::{DatabaseAccessLayer, DatabaseDialect, Error, QueueDao, QueuePickTaskDao};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::{location, tenant_schema, POSTGRES_TASKS_DDL, POSTGRES_TYPED_TASKS_DDL};

const TABLE: &str = "dbqueue_test_tasks";
const TYPED_TABLE: &str = "dbqueue_test_typed_tasks";

async fn setup(queue_id: &str) -> Option<(PgDriver, DatabaseAccessLayer, QueueLocation)> {
    setup_table(POSTGRES_TASKS_DDL, TABLE, tenant_schema(), queue_id).await
}

async fn setup_table(
    ddl: &str,
    table: &str,
    schema: QueueTableSchema,
    queue_id: &str,
) -> Option<(PgDriver, DatabaseAccessLayer, QueueLocation)> {
    let Ok(dsn) = std::env::var("DBQUEUE_TEST_POSTGRES_DSN") else {
        eprintln!("DBQUEUE_TEST_POSTGRES_DSN not set, skipping");
        return None;
    };
    let mut driver = PgDriver::connect(&dsn).await.expect("Failed to connect");
    driver
        .update(ddl, &NamedParams::new())
        .await
        .expect("Failed to create table");
    driver
        .update(
            &format!("DELETE FROM {} WHERE queue_name = :queueName", table),
            &NamedParams::new().with("queueName", queue_id),
        )
        .await
        .expect("Failed to clean queue");

    let dal = DatabaseAccessLayer::new(
        DatabaseDialect::StandardSql,
        schema,
        Arc::new(driver.clone()),
    );
    Some((driver, dal, location(table, queue_id)))
}

async fn enqueue(dal: &DatabaseAccessLayer, location: &QueueLocation, params: EnqueueParams) -> i64 {
    let dao = dal.queue_dao().clone();
    let location = location.clone();
    dal.transact(move |ops| {
        Box::pin(async move { dao.enqueue(ops, &location, &params).await })
    })
    .await
    .expect("enqueue failed")
}

#[tokio::test]
#[serial]
async fn test_postgres_round_trip() {
    let Some((_driver, dal, location)) = setup("pg_round_trip").await else {
        return;
    };

    let id = enqueue(
        &dal,
        &location,
        EnqueueParams::new()
            .with_payload("hello")
            .with_ext_data("tenant", "acme"),
    )
    .await;
    assert!(id > 0);

    let picker = dal.create_pick_task_dao(
        location.clone(),
        Arc::new(FailureSettingsPolicy::default()),
    );
    let dao = dal.queue_dao().clone();
    let (task, deleted) = dal
        .transact(move |ops| {
            Box::pin(async move {
                let task = picker.pick_task(ops).await?.ok_or_else(|| Error::Internal {
                    message: "no task".to_string(),
                })?;
                let deleted = dao.delete_task(ops, &location, task.id).await?;
                Ok::<_, Error>((task, deleted))
            })
        })
        .await
        .unwrap();

    assert_eq!(task.id, id);
    assert_eq!(task.payload.as_deref(), Some("hello"));
    assert_eq!(task.attempts_count, 1);
    assert_eq!(task.ext_data.get("tenant"), Some(&SqlValue::from("acme")));
    assert!(deleted);
}

#[tokio::test]
#[serial]
async fn test_postgres_missing_ext_values_fill_typed_columns_with_null() {
    let schema = QueueTableSchema::builder()
        .with_ext_fields(["priority", "deadline"])
        .build()
        .unwrap();
    let Some((_driver, dal, location)) =
        setup_table(POSTGRES_TYPED_TASKS_DDL, TYPED_TABLE, schema, "pg_typed_ext").await
    else {
        return;
    };

    let bare = enqueue(&dal, &location, EnqueueParams::new()).await;
    let ranked = enqueue(
        &dal,
        &location,
        EnqueueParams::new().with_ext_data("priority", 5i64),
    )
    .await;

    let picker = dal.create_pick_task_dao(location, Arc::new(FailureSettingsPolicy::default()));
    let (first, second) = dal
        .transact(move |ops| {
            Box::pin(async move {
                let first = picker.pick_task(ops).await?;
                let second = picker.pick_task(ops).await?;
                Ok::<_, Error>((first, second))
            })
        })
        .await
        .unwrap();

    let first = first.expect("bare task");
    assert_eq!(first.id, bare);
    assert_eq!(first.payload, None);
    assert_eq!(first.ext_data.get("priority"), Some(&SqlValue::Null));
    assert_eq!(first.ext_data.get("deadline"), Some(&SqlValue::Null));

    let second = second.expect("ranked task");
    assert_eq!(second.id, ranked);
    assert_eq!(second.ext_data.get("priority"), Some(&SqlValue::Int(5)));
    assert_eq!(second.ext_data.get("deadline"), Some(&SqlValue::Null));
}

#[tokio::test]
#[serial]
async fn test_postgres_reenqueue_and_delay() {
    let Some((_driver, dal, location)) = setup("pg_reenqueue").await else {
        return;
    };
    let id = enqueue(&dal, &location, EnqueueParams::new()).await;

    let dao = dal.queue_dao().clone();
    let target = location.clone();
    let rescheduled = dal
        .transact(move |ops| {
            Box::pin(async move {
                dao.reenqueue(ops, &target, id, Duration::from_secs(3600))
                    .await
            })
        })
        .await
        .unwrap();
    assert!(rescheduled);

    let picker = dal.create_pick_task_dao(location, Arc::new(FailureSettingsPolicy::default()));
    let picked = dal
        .transact(move |ops| Box::pin(async move { picker.pick_task(ops).await }))
        .await
        .unwrap();
    assert!(picked.is_none());
}

#[tokio::test]
#[serial]
async fn test_postgres_open_transactions_skip_locked_rows() {
    let Some((driver, dal, location)) = setup("pg_skip_locked").await else {
        return;
    };
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(enqueue(&dal, &location, EnqueueParams::new()).await);
    }

    let picker = dal.create_pick_task_dao(location, Arc::new(FailureSettingsPolicy::default()));
    let mut open = Vec::new();
    for expected in &ids[..3] {
        let mut tx = driver.begin().await.unwrap();
        let task = picker.pick_task(tx.operations()).await.unwrap().unwrap();
        // Lowest unlocked id, skipping rows held by the transactions still open.
        assert_eq!(task.id, *expected);
        open.push(tx);
    }

    let mut tx = driver.begin().await.unwrap();
    let last = picker.pick_task(tx.operations()).await.unwrap().unwrap();
    assert_eq!(last.id, ids[3]);
    assert!(picker.pick_task(tx.operations()).await.unwrap().is_none());
    tx.rollback().await.unwrap();

    // Rolled back claims become eligible again, lowest id first.
    for tx in open {
        tx.rollback().await.unwrap();
    }
    let mut tx = driver.begin().await.unwrap();
    let again = picker.pick_task(tx.operations()).await.unwrap().unwrap();
    assert_eq!(again.id, ids[0]);
    assert_eq!(again.attempts_count, 1);
    tx.rollback().await.unwrap();
}
