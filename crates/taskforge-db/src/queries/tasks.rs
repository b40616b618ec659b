//! Database query functions for the `tasks` table: creation, reads, the
//! skip-locked fetch and conditional-update primitives the executor relies
//! on (S1/S2), and the operator-API state commands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TaskStoreError;
use crate::models::{DuplicatePolicy, Priority, Task, TaskStatus, TaskType};

/// Non-terminal statuses the skip-locked fetch considers ready (§4.2).
const EXECUTABLE_STATUSES: &str = "('PENDING','SCHEDULED','FAILED','RETRY_PENDING')";

/// Terminal statuses per I2; never re-read for execution, never transition.
const TERMINAL_STATUSES: &str =
    "('COMPLETED','CANCELLED','EXPIRED','MAX_RETRIES_EXCEEDED','DEAD_LETTER')";

/// Input to `insert_task`. `scheduled_time` defaults to now when absent.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub priority: Priority,
    pub reference_id: String,
    pub secondary_reference_id: Option<String>,
    pub description: Option<String>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cron_expression: Option<String>,
    pub max_retries: Option<i32>,
    pub retry_delay_hours: Option<i32>,
    /// `Some(policy)` opts into the I5 duplicate check; `None` skips it
    /// entirely (duplicate prevention is requested at creation time, not a
    /// blanket store-level constraint).
    pub duplicate_policy: Option<DuplicatePolicy>,
}

/// Insert a new task, honoring `duplicate_policy` if set (I5).
///
/// Returns `TaskStoreError::Duplicate` under `DuplicatePolicy::Reject` when a
/// non-terminal task already exists for the same `(reference_id, task_type)`.
pub async fn insert_task(pool: &PgPool, new_task: NewTask) -> Result<Task> {
    let mut tx = pool.begin().await.context("failed to open transaction")?;

    if let Some(policy) = new_task.duplicate_policy {
        let existing = sqlx::query_as::<_, Task>(&format!(
            "SELECT * FROM tasks \
             WHERE reference_id = $1 AND task_type = $2 AND status NOT IN {TERMINAL_STATUSES} \
             FOR UPDATE"
        ))
        .bind(&new_task.reference_id)
        .bind(new_task.task_type)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check for duplicate task")?;

        if let Some(existing) = existing {
            return match policy {
                DuplicatePolicy::Reject => Err(TaskStoreError::Duplicate(existing.id).into()),
                DuplicatePolicy::ReturnExisting => {
                    tx.commit().await.context("failed to commit duplicate check")?;
                    Ok(existing)
                }
            };
        }
    }

    let status = match new_task.scheduled_time {
        Some(t) if t > Utc::now() => TaskStatus::Scheduled,
        _ => TaskStatus::Pending,
    };
    let scheduled_time = new_task.scheduled_time.unwrap_or_else(Utc::now);

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
           (task_type, priority, reference_id, secondary_reference_id, description, \
            status, payload, metadata, scheduled_time, expires_at, cron_expression, \
            max_retries, retry_delay_hours) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING *",
    )
    .bind(new_task.task_type)
    .bind(new_task.priority)
    .bind(&new_task.reference_id)
    .bind(&new_task.secondary_reference_id)
    .bind(&new_task.description)
    .bind(status)
    .bind(&new_task.payload)
    .bind(&new_task.metadata)
    .bind(scheduled_time)
    .bind(new_task.expires_at)
    .bind(&new_task.cron_expression)
    .bind(new_task.max_retries)
    .bind(new_task.retry_delay_hours)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert task")?;

    tx.commit().await.context("failed to commit task insert")?;
    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Filters accepted by `search_tasks`. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub reference_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// List tasks matching the given filter, newest first.
pub async fn search_tasks(pool: &PgPool, filter: &TaskFilter) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE ($1::text IS NULL OR task_type = $1) \
           AND ($2::text IS NULL OR status = $2) \
           AND ($3::text IS NULL OR reference_id = $3) \
         ORDER BY created_at DESC \
         LIMIT $4 OFFSET $5",
    )
    .bind(filter.task_type)
    .bind(filter.status)
    .bind(&filter.reference_id)
    .bind(filter.limit)
    .bind(filter.offset)
    .fetch_all(pool)
    .await
    .context("failed to search tasks")?;

    Ok(tasks)
}

/// Skip-locked fetch (S1): select up to `batch_size` executable tasks,
/// ordered (priority desc, scheduled_time asc), acquiring row locks other
/// concurrent fetches silently skip. This SELECT runs and commits as its own
/// implicit transaction -- it only de-duplicates overlapping poll ticks, the
/// conditional update in `acquire_task_lock` is the actual guarantee (§4.1).
pub async fn fetch_ready_tasks(pool: &PgPool, batch_size: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(&format!(
        "SELECT * FROM tasks \
         WHERE status IN {EXECUTABLE_STATUSES} \
           AND scheduled_time <= now() \
           AND (locked_by IS NULL OR locked_until < now()) \
           AND (expires_at IS NULL OR expires_at > now()) \
         ORDER BY priority DESC, scheduled_time ASC \
         LIMIT $1 \
         FOR UPDATE SKIP LOCKED"
    ))
    .bind(batch_size)
    .fetch_all(pool)
    .await
    .context("failed to fetch ready tasks")?;

    Ok(tasks)
}

/// Conditional lock acquisition (S2, §4.3 step 1).
///
/// Succeeds only if `version` still matches and the row is unlocked or its
/// lock has expired. Returns the number of rows affected: 1 means the lock
/// was acquired, 0 means another replica won the race.
pub async fn acquire_task_lock(
    pool: &PgPool,
    task_id: Uuid,
    version: i64,
    instance_id: &str,
    lock_duration_minutes: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET locked_by = $1, \
             locked_until = now() + make_interval(mins => $2), \
             status = 'PROCESSING', \
             started_at = now(), \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $3 AND version = $4 AND (locked_by IS NULL OR locked_until < now())",
    )
    .bind(instance_id)
    .bind(lock_duration_minutes)
    .bind(task_id)
    .bind(version)
    .execute(pool)
    .await
    .context("failed to acquire task lock")?;

    Ok(result.rows_affected())
}

/// Release the lock without changing status (§4.3 step 4: task was reloaded
/// but is no longer executable, e.g. an operator cancelled it concurrently).
pub async fn release_lock(pool: &PgPool, task_id: Uuid, version: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET locked_by = NULL, locked_until = NULL, updated_at = now(), version = version + 1 \
         WHERE id = $1 AND version = $2",
    )
    .bind(task_id)
    .bind(version)
    .execute(pool)
    .await
    .context("failed to release task lock")?;

    Ok(result.rows_affected())
}

/// Mark a task `EXPIRED` (§4.3 step 3). No alert is emitted for expiry.
pub async fn mark_expired(pool: &PgPool, task_id: Uuid, version: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'EXPIRED', \
             completed_at = now(), \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $1 AND version = $2",
    )
    .bind(task_id)
    .bind(version)
    .execute(pool)
    .await
    .context("failed to mark task expired")?;

    Ok(result.rows_affected())
}

/// Commit a successful attempt (§4.3 step 8a).
///
/// Takes a generic executor, not `&PgPool`, so the caller can run this in
/// the same `sqlx::Transaction` as the execution-log close that precedes
/// it -- the log write and the task update must land together.
#[allow(clippy::too_many_arguments)]
pub async fn complete_task<'a, E>(
    executor: E,
    task_id: Uuid,
    version: i64,
    duration_ms: i64,
    execution_result: &serde_json::Value,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'a>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'COMPLETED', \
             completed_at = now(), \
             execution_duration_ms = $1, \
             execution_result = $2, \
             last_error = NULL, \
             last_error_stack_trace = NULL, \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $3 AND version = $4",
    )
    .bind(duration_ms)
    .bind(execution_result)
    .bind(task_id)
    .bind(version)
    .execute(executor)
    .await
    .context("failed to commit completed task")?;

    Ok(result.rows_affected())
}

/// Commit a permanent failure (§4.3 step 8b). Caller decides alerting.
/// Generic executor, same reason as [`complete_task`].
pub async fn dead_letter_task<'a, E>(
    executor: E,
    task_id: Uuid,
    version: i64,
    last_error: &str,
    last_error_stack_trace: Option<&str>,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'a>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'DEAD_LETTER', \
             completed_at = now(), \
             last_error = $1, \
             last_error_stack_trace = $2, \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $3 AND version = $4",
    )
    .bind(last_error)
    .bind(last_error_stack_trace)
    .bind(task_id)
    .bind(version)
    .execute(executor)
    .await
    .context("failed to dead-letter task")?;

    Ok(result.rows_affected())
}

/// Commit a retry-exhausted failure (§4.3 step 8c). Generic executor, same
/// reason as [`complete_task`].
pub async fn exceed_max_retries<'a, E>(
    executor: E,
    task_id: Uuid,
    version: i64,
    last_error: &str,
    last_error_stack_trace: Option<&str>,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'a>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'MAX_RETRIES_EXCEEDED', \
             retry_count = retry_count + 1, \
             completed_at = now(), \
             last_error = $1, \
             last_error_stack_trace = $2, \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $3 AND version = $4",
    )
    .bind(last_error)
    .bind(last_error_stack_trace)
    .bind(task_id)
    .bind(version)
    .execute(executor)
    .await
    .context("failed to mark task max-retries-exceeded")?;

    Ok(result.rows_affected())
}

/// Commit a retryable failure and schedule the next attempt (§4.3 step 8d).
/// Generic executor, same reason as [`complete_task`].
#[allow(clippy::too_many_arguments)]
pub async fn schedule_retry<'a, E>(
    executor: E,
    task_id: Uuid,
    version: i64,
    next_scheduled_time: DateTime<Utc>,
    last_error: &str,
    last_error_stack_trace: Option<&str>,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'a>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'RETRY_PENDING', \
             retry_count = retry_count + 1, \
             scheduled_time = $1, \
             last_error = $2, \
             last_error_stack_trace = $3, \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $4 AND version = $5",
    )
    .bind(next_scheduled_time)
    .bind(last_error)
    .bind(last_error_stack_trace)
    .bind(task_id)
    .bind(version)
    .execute(executor)
    .await
    .context("failed to schedule task retry")?;

    Ok(result.rows_affected())
}

/// Bulk-reap tasks whose lock has gone stale (§4.5). Returns the ids reset.
///
/// A single conditional update over the captured predicate; idempotent,
/// since a second reap at the same instant matches no rows.
pub async fn reap_stale_tasks(
    pool: &PgPool,
    stale_threshold_minutes: i32,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "UPDATE tasks \
         SET status = 'RETRY_PENDING', \
             last_error = 'Task execution timed out or instance crashed', \
             locked_by = NULL, \
             locked_until = NULL, \
             scheduled_time = now() + interval '60 seconds', \
             updated_at = now(), \
             version = version + 1 \
         WHERE locked_by IS NOT NULL \
           AND status = 'PROCESSING' \
           AND locked_until < now() - make_interval(mins => $1) \
         RETURNING id",
    )
    .bind(stale_threshold_minutes)
    .fetch_all(pool)
    .await
    .context("failed to reap stale tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Operator command: cancel a non-terminal, non-locked task.
pub async fn cancel_task(pool: &PgPool, task_id: Uuid, reason: &str) -> Result<u64> {
    let last_error = format!("Cancelled: {reason}");
    let result = sqlx::query(&format!(
        "UPDATE tasks \
         SET status = 'CANCELLED', completed_at = now(), last_error = $1, \
             updated_at = now(), version = version + 1 \
         WHERE id = $2 AND status NOT IN {TERMINAL_STATUSES} AND locked_by IS NULL"
    ))
    .bind(&last_error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(result.rows_affected())
}

/// Operator command: pause a non-terminal, non-locked task.
pub async fn pause_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(&format!(
        "UPDATE tasks \
         SET status = 'PAUSED', updated_at = now(), version = version + 1 \
         WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES} AND locked_by IS NULL"
    ))
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to pause task")?;

    Ok(result.rows_affected())
}

/// Operator command: resume a paused task back to `PENDING`.
pub async fn resume_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'PENDING', scheduled_time = now(), updated_at = now(), version = version + 1 \
         WHERE id = $1 AND status = 'PAUSED'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to resume task")?;

    Ok(result.rows_affected())
}

/// Operator command: retry a failed/paused/exhausted task at `scheduled_time`
/// (defaulting to now when absent).
pub async fn retry_task(
    pool: &PgPool,
    task_id: Uuid,
    scheduled_time: Option<DateTime<Utc>>,
) -> Result<u64> {
    let scheduled_time = scheduled_time.unwrap_or_else(Utc::now);
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'RETRY_PENDING', \
             scheduled_time = $1, \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $2 AND status IN ('FAILED', 'PAUSED', 'MAX_RETRIES_EXCEEDED')",
    )
    .bind(scheduled_time)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry task")?;

    Ok(result.rows_affected())
}

/// Operator command: retry immediately, same precondition as `retry_task`
/// but leaves status at `PENDING` so the caller can drive one synchronous
/// execution of the pipeline rather than waiting for the next poll tick.
pub async fn retry_task_now(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'PENDING', \
             scheduled_time = now(), \
             locked_by = NULL, \
             locked_until = NULL, \
             updated_at = now(), \
             version = version + 1 \
         WHERE id = $1 AND status IN ('FAILED', 'PAUSED', 'MAX_RETRIES_EXCEEDED')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry task immediately")?;

    Ok(result.rows_affected())
}

/// Per-(type, status) counts for the stats endpoint.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskStatCount {
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub count: i64,
}

/// Aggregate task counts grouped by type and status, for dashboards.
pub async fn task_stats(pool: &PgPool) -> Result<Vec<TaskStatCount>> {
    let rows = sqlx::query_as::<_, TaskStatCount>(
        "SELECT task_type, status, COUNT(*) as count \
         FROM tasks \
         GROUP BY task_type, status \
         ORDER BY task_type, status",
    )
    .fetch_all(pool)
    .await
    .context("failed to aggregate task stats")?;

    Ok(rows)
}

/// Delete terminal tasks (and, via `ON DELETE CASCADE`, their execution
/// logs) older than `retention_days`. Used by the retention sweep.
pub async fn delete_terminal_tasks_older_than(
    pool: &PgPool,
    retention_days: i32,
) -> Result<u64> {
    let result = sqlx::query(&format!(
        "DELETE FROM tasks \
         WHERE status IN {TERMINAL_STATUSES} \
           AND completed_at IS NOT NULL \
           AND completed_at < now() - make_interval(days => $1)"
    ))
    .bind(retention_days)
    .execute(pool)
    .await
    .context("failed to sweep terminal tasks")?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_filter_default_has_sane_limit() {
        let filter = TaskFilter::new();
        assert_eq!(filter.limit, 50);
        assert_eq!(filter.offset, 0);
        assert!(filter.status.is_none());
    }
}
