//! Integration tests for the append-only `execution_logs` table.

use taskforge_db::models::{AttemptStatus, Priority, TaskType};
use taskforge_db::queries::execution_logs;
use taskforge_db::queries::tasks::{self, NewTask};

use taskforge_test_utils::{create_test_db, drop_test_db};

fn sample_task() -> NewTask {
    NewTask {
        task_type: TaskType::PaymentRefund,
        priority: Priority::High,
        reference_id: "PAY-1".to_string(),
        secondary_reference_id: None,
        description: None,
        payload: serde_json::json!({}),
        metadata: serde_json::json!({}),
        scheduled_time: None,
        expires_at: None,
        cron_expression: None,
        max_retries: None,
        retry_delay_hours: None,
        duplicate_policy: None,
    }
}

#[tokio::test]
async fn open_then_close_success_round_trips() {
    let (pool, db_name) = create_test_db().await;
    let task = tasks::insert_task(&pool, sample_task()).await.unwrap();

    let log = execution_logs::open_execution_log(
        &pool,
        task.id,
        1,
        "host-a:123",
        &serde_json::json!({"reference_id": "PAY-1"}),
    )
    .await
    .expect("open should succeed");
    assert_eq!(log.status, AttemptStatus::Processing);

    execution_logs::close_execution_log_success(
        &pool,
        log.id,
        45,
        Some(200),
        &serde_json::json!({"refunded": true}),
    )
    .await
    .expect("close success should succeed");

    let logs = execution_logs::list_logs_for_task(&pool, task.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, AttemptStatus::Completed);
    assert_eq!(logs[0].success, Some(true));
    assert_eq!(logs[0].http_status_code, Some(200));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn close_failure_truncates_long_stack_trace() {
    let (pool, db_name) = create_test_db().await;
    let task = tasks::insert_task(&pool, sample_task()).await.unwrap();

    let log = execution_logs::open_execution_log(&pool, task.id, 1, "host-a:123", &serde_json::json!({}))
        .await
        .unwrap();

    let huge_trace = "x".repeat(taskforge_db::models::MAX_STACK_TRACE_BYTES * 3);
    execution_logs::close_execution_log_failure(
        &pool,
        log.id,
        10,
        "HTTP_503",
        "payments service unavailable",
        Some(&huge_trace),
        Some(503),
    )
    .await
    .expect("close failure should succeed");

    let logs = execution_logs::list_logs_for_task(&pool, task.id).await.unwrap();
    let stored = logs[0].error_stack_trace.as_ref().expect("stack trace stored");
    assert_eq!(stored.len(), taskforge_db::models::MAX_STACK_TRACE_BYTES);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn two_attempts_cannot_share_attempt_number() {
    let (pool, db_name) = create_test_db().await;
    let task = tasks::insert_task(&pool, sample_task()).await.unwrap();

    execution_logs::open_execution_log(&pool, task.id, 1, "host-a:123", &serde_json::json!({}))
        .await
        .expect("first attempt opens fine");

    let exists = execution_logs::attempt_number_exists(&pool, task.id, 1).await.unwrap();
    assert!(exists);

    let second = execution_logs::open_execution_log(&pool, task.id, 1, "host-b:456", &serde_json::json!({}))
        .await;
    assert!(second.is_err(), "duplicate attempt_number should be rejected by the unique constraint");

    drop_test_db(&db_name).await;
}
