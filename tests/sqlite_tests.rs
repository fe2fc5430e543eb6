#![cfg(feature = "sqlite")]

use chrono::{DateTime, Utc};
use dbqueue::driver::sqlite::SqliteDriver;
use dbqueue::driver::{QueryOperations, TransactionOperations};
use dbqueue::settings::{FailureSettingsPolicy, QueueLocation, QueueTableSchema};
use dbqueue::types::{EnqueueParams, NamedParams, ScalarKind, SqlValue};
use dbqueue::{
    DatabaseAccessLayer, DatabaseDialect, Error, QueueDao, QueuePickTaskDao, TaskRecord,
    MAX_EXECUTION_DELAY,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::sqlite::{make_all_due, sqlite_driver};
use common::{location, tenant_schema, TASKS_TABLE};

fn dal_for(driver: &SqliteDriver, schema: QueueTableSchema) -> DatabaseAccessLayer {
    DatabaseAccessLayer::new(DatabaseDialect::Embedded, schema, Arc::new(driver.clone()))
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

async fn pick(dal: &DatabaseAccessLayer, location: &QueueLocation) -> Option<TaskRecord> {
    let picker = dal.create_pick_task_dao(
        location.clone(),
        Arc::new(FailureSettingsPolicy::default()),
    );
    dal.transact(move |ops| Box::pin(async move { picker.pick_task(ops).await }))
        .await
        .expect("pick failed")
}

async fn row_count(driver: &SqliteDriver) -> i64 {
    let mut driver = driver.clone();
    driver
        .query_scalar("SELECT count(*) FROM tasks", ScalarKind::Int)
        .await
        .unwrap()
        .and_then(|v| v.as_i64())
        .unwrap()
}

async fn next_process_at(driver: &SqliteDriver, id: i64) -> DateTime<Utc> {
    let mut driver = driver.clone();
    let rows = driver
        .query_rows(
            "SELECT next_process_at FROM tasks WHERE id = :id",
            &NamedParams::new().with("id", id),
        )
        .await
        .unwrap();
    rows[0].get_timestamp("next_process_at").unwrap()
}

fn assert_about(actual: DateTime<Utc>, expected_offset_secs: i64) {
    let offset = (actual - Utc::now()).num_seconds();
    assert!(
        (expected_offset_secs - 5..=expected_offset_secs + 1).contains(&offset),
        "expected about {}s ahead, got {}s",
        expected_offset_secs,
        offset
    );
}

#[tokio::test]
async fn test_enqueue_then_delete() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");

    let id = enqueue(&dal, &mail, EnqueueParams::new().with_payload("hello")).await;
    assert!(id > 0);
    assert_eq!(row_count(&driver).await, 1);

    let dao = dal.queue_dao().clone();
    let target = mail.clone();
    let (first, second) = dal
        .transact(move |ops| {
            Box::pin(async move {
                let first = dao.delete_task(ops, &target, id).await?;
                let second = dao.delete_task(ops, &target, id).await?;
                Ok::<_, Error>((first, second))
            })
        })
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(row_count(&driver).await, 0);
}

#[tokio::test]
async fn test_delete_ignores_other_queue() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let id = enqueue(&dal, &location(TASKS_TABLE, "mail"), EnqueueParams::new()).await;

    let dao = dal.queue_dao().clone();
    let deleted = dal
        .transact(move |ops| {
            Box::pin(async move { dao.delete_task(ops, &location(TASKS_TABLE, "sms"), id).await })
        })
        .await
        .unwrap();

    assert!(!deleted);
    assert_eq!(row_count(&driver).await, 1);
}

#[tokio::test]
async fn test_pick_claims_and_counts_attempts() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let id = enqueue(&dal, &mail, EnqueueParams::new().with_payload("hello")).await;

    let task = pick(&dal, &mail).await.expect("task should be eligible");
    assert_eq!(task.id, id);
    assert_eq!(task.payload.as_deref(), Some("hello"));
    assert_eq!(task.attempts_count, 1);
    assert_eq!(task.reenqueue_attempts_count, 0);
    assert_eq!(task.total_attempts_count, 1);
    assert_about(task.next_process_at, 60);

    // Claimed tasks stay invisible until their fallback delay expires.
    assert!(pick(&dal, &mail).await.is_none());

    make_all_due(&driver).await;
    let task = pick(&dal, &mail).await.expect("task should be due again");
    assert_eq!(task.attempts_count, 2);
    assert_eq!(task.total_attempts_count, 2);
    assert_about(task.next_process_at, 120);
}

#[tokio::test]
async fn test_reenqueue_resets_attempts() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let id = enqueue(&dal, &mail, EnqueueParams::new()).await;
    pick(&dal, &mail).await.expect("task should be eligible");

    let dao = dal.queue_dao().clone();
    let target = mail.clone();
    let (known, unknown) = dal
        .transact(move |ops| {
            Box::pin(async move {
                let known = dao
                    .reenqueue(ops, &target, id, Duration::from_secs(60))
                    .await?;
                let unknown = dao
                    .reenqueue(ops, &target, id + 100, Duration::from_secs(60))
                    .await?;
                Ok::<_, Error>((known, unknown))
            })
        })
        .await
        .unwrap();
    assert!(known);
    assert!(!unknown);
    assert_about(next_process_at(&driver, id).await, 60);

    make_all_due(&driver).await;
    let task = pick(&dal, &mail).await.expect("task should be due again");
    assert_eq!(task.attempts_count, 1);
    assert_eq!(task.reenqueue_attempts_count, 1);
    assert_eq!(task.total_attempts_count, 2);
}

#[tokio::test]
async fn test_saturated_backoff_keeps_queue_moving() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let worn = enqueue(&dal, &mail, EnqueueParams::new()).await;
    let fresh = enqueue(&dal, &mail, EnqueueParams::new()).await;

    let mut raw = driver.clone();
    raw.update(
        "UPDATE tasks SET attempt = 40 WHERE id = :id",
        &NamedParams::new().with("id", worn),
    )
    .await
    .unwrap();

    let task = pick(&dal, &mail).await.expect("worn task is still eligible");
    assert_eq!(task.id, worn);
    assert_eq!(task.attempts_count, 41);
    let max_secs = MAX_EXECUTION_DELAY.as_secs() as i64;
    assert_about(task.next_process_at, max_secs);

    assert_eq!(pick(&dal, &mail).await.map(|t| t.id), Some(fresh));

    let dao = dal.queue_dao().clone();
    let target = mail.clone();
    let rescheduled = dal
        .transact(move |ops| {
            Box::pin(async move { dao.reenqueue(ops, &target, fresh, Duration::MAX).await })
        })
        .await
        .unwrap();
    assert!(rescheduled);
    assert_about(next_process_at(&driver, fresh).await, max_secs);
}

#[tokio::test]
async fn test_delayed_task_is_not_eligible() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let id = enqueue(
        &dal,
        &mail,
        EnqueueParams::new().with_execution_delay(Duration::from_secs(3600)),
    )
    .await;

    assert_about(next_process_at(&driver, id).await, 3600);
    assert!(pick(&dal, &mail).await.is_none());
}

#[tokio::test]
async fn test_queues_sharing_a_table_are_isolated() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let sms = location(TASKS_TABLE, "sms");

    enqueue(&dal, &mail, EnqueueParams::new().with_payload("letter")).await;
    let sms_id = enqueue(&dal, &sms, EnqueueParams::new().with_payload("text")).await;

    let task = pick(&dal, &sms).await.expect("sms task");
    assert_eq!(task.id, sms_id);
    assert_eq!(task.payload.as_deref(), Some("text"));
    assert!(pick(&dal, &sms).await.is_none());
    assert!(pick(&dal, &mail).await.is_some());
}

#[tokio::test]
async fn test_pick_takes_lowest_id_first() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let first = enqueue(&dal, &mail, EnqueueParams::new()).await;
    let second = enqueue(&dal, &mail, EnqueueParams::new()).await;

    assert_eq!(pick(&dal, &mail).await.map(|t| t.id), Some(first));
    assert_eq!(pick(&dal, &mail).await.map(|t| t.id), Some(second));
    assert!(pick(&dal, &mail).await.is_none());
}

#[tokio::test]
async fn test_ext_fields_round_trip() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, tenant_schema());
    let mail = location(TASKS_TABLE, "mail");

    enqueue(&dal, &mail, EnqueueParams::new().with_ext_data("tenant", "acme")).await;
    enqueue(&dal, &mail, EnqueueParams::new()).await;

    let task = pick(&dal, &mail).await.unwrap();
    assert_eq!(task.ext_data.get("tenant"), Some(&SqlValue::from("acme")));
    let task = pick(&dal, &mail).await.unwrap();
    assert_eq!(task.ext_data.get("tenant"), Some(&SqlValue::Null));
}

#[tokio::test]
async fn test_undeclared_ext_field_is_rejected() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, tenant_schema());

    let dao = dal.queue_dao().clone();
    let result = dal
        .transact(move |ops| {
            Box::pin(async move {
                let params = EnqueueParams::new().with_ext_data("region", "eu");
                dao.enqueue(ops, &location(TASKS_TABLE, "mail"), &params).await
            })
        })
        .await;

    assert!(matches!(result, Err(Error::InvalidExtField { field }) if field == "region"));
    assert_eq!(row_count(&driver).await, 0);
}

#[tokio::test]
async fn test_failed_unit_of_work_rolls_back_enqueue() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());

    let dao = dal.queue_dao().clone();
    let result = dal
        .transact_void(move |ops| {
            Box::pin(async move {
                dao.enqueue(ops, &location(TASKS_TABLE, "mail"), &EnqueueParams::new())
                    .await?;
                Err::<(), _>(Error::Internal {
                    message: "handler failed".to_string(),
                })
            })
        })
        .await;

    assert!(matches!(result, Err(Error::Internal { message }) if message == "handler failed"));
    assert_eq!(row_count(&driver).await, 0);
}

#[tokio::test]
async fn test_picker_waits_for_open_claim_and_takes_another_task() {
    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    let first = enqueue(&dal, &mail, EnqueueParams::new()).await;
    let second = enqueue(&dal, &mail, EnqueueParams::new()).await;

    let picker = dal.create_pick_task_dao(
        mail.clone(),
        Arc::new(FailureSettingsPolicy::default()),
    );
    let mut held = driver.begin().await.unwrap();
    let claimed = picker
        .pick_task(held.operations())
        .await
        .unwrap()
        .expect("first claim");
    assert_eq!(claimed.id, first);

    let contender = {
        let dal = dal.clone();
        let mail = mail.clone();
        tokio::spawn(async move { pick(&dal, &mail).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !contender.is_finished(),
        "a second claim must not proceed while the first is open"
    );

    held.commit().await.unwrap();
    let other = contender.await.unwrap().expect("second claim");
    assert_ne!(other.id, claimed.id);
    assert_eq!(other.id, second);
}

#[tokio::test]
async fn test_concurrent_pickers_never_share_a_task() {
    const PICKERS: usize = 4;
    const TASKS: usize = 8;

    let (_dir, driver) = sqlite_driver().await;
    let dal = dal_for(&driver, QueueTableSchema::default());
    let mail = location(TASKS_TABLE, "mail");
    for i in 0..TASKS {
        enqueue(&dal, &mail, EnqueueParams::new().with_payload(format!("task-{}", i))).await;
    }

    let mut handles = Vec::with_capacity(PICKERS);
    for _ in 0..PICKERS {
        let dal = dal.clone();
        let mail = mail.clone();
        handles.push(tokio::spawn(async move { pick(&dal, &mail).await }));
    }

    let mut picked = HashSet::new();
    for handle in handles {
        let task = handle.await.unwrap().expect("every picker finds a task");
        assert_eq!(task.attempts_count, 1);
        picked.insert(task.id);
    }
    assert_eq!(picked.len(), PICKERS);

    let mut remaining = 0;
    while let Some(task) = pick(&dal, &mail).await {
        assert!(!picked.contains(&task.id));
        remaining += 1;
    }
    assert_eq!(remaining, TASKS - PICKERS);
}
