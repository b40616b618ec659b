//! Database query functions for the append-only `execution_logs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{truncate_stack_trace, AttemptStatus, ExecutionLog};

/// Open a new log row at the start of an attempt (§4.3 step 5).
pub async fn open_execution_log(
    pool: &PgPool,
    task_id: Uuid,
    attempt_number: i32,
    executor_instance: &str,
    request_payload: &serde_json::Value,
) -> Result<ExecutionLog> {
    let log = sqlx::query_as::<_, ExecutionLog>(
        "INSERT INTO execution_logs \
           (task_id, attempt_number, status, executor_instance, started_at, request_payload) \
         VALUES ($1, $2, 'PROCESSING', $3, now(), $4) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(attempt_number)
    .bind(executor_instance)
    .bind(request_payload)
    .fetch_one(pool)
    .await
    .context("failed to open execution log")?;

    Ok(log)
}

/// Close a log row as a successful attempt (§4.3 step 8a).
///
/// Takes a generic executor rather than `&PgPool` so callers can run this
/// inside the same `sqlx::Transaction` as the task-row commit that follows
/// it -- the two writes must land together or not at all.
pub async fn close_execution_log_success<'a, E>(
    executor: E,
    log_id: Uuid,
    duration_ms: i64,
    http_status_code: Option<i32>,
    response_payload: &serde_json::Value,
) -> Result<()>
where
    E: sqlx::PgExecutor<'a>,
{
    sqlx::query(
        "UPDATE execution_logs \
         SET status = 'COMPLETED', \
             success = true, \
             completed_at = now(), \
             duration_ms = $1, \
             http_status_code = $2, \
             response_payload = $3 \
         WHERE id = $4",
    )
    .bind(duration_ms)
    .bind(http_status_code)
    .bind(response_payload)
    .bind(log_id)
    .execute(executor)
    .await
    .context("failed to close execution log as success")?;

    Ok(())
}

/// Close a log row as a failed attempt. The stack trace is truncated to
/// `MAX_STACK_TRACE_BYTES` before storage (§3).
///
/// Takes a generic executor for the same reason as
/// [`close_execution_log_success`].
#[allow(clippy::too_many_arguments)]
pub async fn close_execution_log_failure<'a, E>(
    executor: E,
    log_id: Uuid,
    duration_ms: i64,
    error_type: &str,
    error_message: &str,
    error_stack_trace: Option<&str>,
    http_status_code: Option<i32>,
) -> Result<()>
where
    E: sqlx::PgExecutor<'a>,
{
    let truncated = error_stack_trace.map(truncate_stack_trace);

    sqlx::query(
        "UPDATE execution_logs \
         SET status = 'FAILED', \
             success = false, \
             completed_at = now(), \
             duration_ms = $1, \
             error_type = $2, \
             error_message = $3, \
             error_stack_trace = $4, \
             http_status_code = $5 \
         WHERE id = $6",
    )
    .bind(duration_ms)
    .bind(error_type)
    .bind(error_message)
    .bind(truncated)
    .bind(http_status_code)
    .bind(log_id)
    .execute(executor)
    .await
    .context("failed to close execution log as failure")?;

    Ok(())
}

/// Full attempt history for a task, oldest first.
pub async fn list_logs_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<ExecutionLog>> {
    let logs = sqlx::query_as::<_, ExecutionLog>(
        "SELECT * FROM execution_logs WHERE task_id = $1 ORDER BY attempt_number ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list execution logs for task")?;

    Ok(logs)
}

/// Whether an attempt number has already been recorded for a task. Used by
/// tests asserting the "no two logs share an attempt_number" invariant.
pub async fn attempt_number_exists(pool: &PgPool, task_id: Uuid, attempt_number: i32) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM execution_logs WHERE task_id = $1 AND attempt_number = $2)",
    )
    .bind(task_id)
    .bind(attempt_number)
    .fetch_one(pool)
    .await
    .context("failed to check execution log attempt number")?;

    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_display_is_screaming_snake() {
        assert_eq!(AttemptStatus::Processing.to_string(), "PROCESSING");
    }
}
