//! The per-task execution pipeline (§4.3): lock acquisition, reload, expiry
//! and executability checks, the handler contract, and the four-way
//! classify-and-commit that follows a handler's outcome.
//!
//! Log-open (step 5) and the handler call (steps 6-7) run as plain pool
//! statements -- an attempt's HTTP call can run long, and holding a
//! transaction across it would pin a connection and a row lock for no
//! benefit. The pair that must not diverge, closing the log and mutating the
//! task row (step 8), runs inside a single `sqlx::Transaction`: if the
//! connection is lost between the two statements the whole pair rolls back,
//! the lock simply expires, and the Stale-Lock Reaper reclaims the task on
//! its next sweep (§4.5).

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use taskforge_db::models::{Task, TaskStatus};
use taskforge_db::queries::{execution_logs as log_db, tasks as task_db};
use uuid::Uuid;

use crate::alert::{Alert, AlertSink};
use crate::config::EngineConfig;
use crate::handler::{HandlerOutcome, HandlerRegistry, ValidationError};
use crate::instance;

/// What became of one pipeline run over a single fetched task.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Another replica's conditional update won the race (§4.1 S2); this
    /// replica does nothing further.
    LockLost,
    /// The task's `expires_at` had already passed (§4.3 step 3).
    Expired,
    /// Reloaded status was neither executable nor `PROCESSING` (§4.3 step 4).
    /// Unreachable in practice since this replica's own lock acquisition is
    /// what sets `PROCESSING`; kept as a defensive check.
    NotExecutable,
    /// No handler is registered for the task's type. Treated as a permanent
    /// failure so a misconfigured deployment dead-letters cleanly instead of
    /// spinning forever.
    NoHandlerRegistered,
    /// `Handler::validate` rejected the task (§4.3 step 6).
    ValidationFailed,
    Completed,
    DeadLettered,
    MaxRetriesExceeded,
    RetryScheduled {
        next_attempt_at: chrono::DateTime<Utc>,
    },
}

/// Runs the execution pipeline against a shared pool, handler registry, and
/// alert sink. Stateless beyond those handles -- safe to share across every
/// concurrently-spawned task slot.
#[derive(Clone)]
pub struct Executor {
    pool: sqlx::PgPool,
    registry: Arc<HandlerRegistry>,
    alert_sink: AlertSink,
}

impl Executor {
    pub fn new(pool: sqlx::PgPool, registry: Arc<HandlerRegistry>, alert_sink: AlertSink) -> Self {
        Self {
            pool,
            registry,
            alert_sink,
        }
    }

    /// Run the full pipeline for one task fetched by the Poller.
    ///
    /// `task` is the row as it was read by `fetch_ready_tasks`; its `version`
    /// is what step 1's conditional update is keyed on. Every later step
    /// re-reads `version` off the freshly reloaded row.
    pub async fn execute_task(&self, task: Task, config: &EngineConfig) -> Result<ExecutionOutcome> {
        // Step 1: conditional lock acquisition (S2).
        let acquired = task_db::acquire_task_lock(
            &self.pool,
            task.id,
            task.version,
            instance::instance_id(),
            config.lock_duration_minutes,
        )
        .await?;
        if acquired == 0 {
            return Ok(ExecutionOutcome::LockLost);
        }

        // Step 2: reload the row we just locked.
        let task = task_db::get_task(&self.pool, task.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task {} vanished after lock acquisition", task.id))?;

        // Step 3: expiry check.
        if let Some(expires_at) = task.expires_at {
            if expires_at <= Utc::now() {
                task_db::mark_expired(&self.pool, task.id, task.version).await?;
                return Ok(ExecutionOutcome::Expired);
            }
        }

        // Step 4: executability check.
        if !task.status.is_executable() && task.status != TaskStatus::Processing {
            task_db::release_lock(&self.pool, task.id, task.version).await?;
            return Ok(ExecutionOutcome::NotExecutable);
        }

        let Some(handler) = self.registry.get(task.task_type) else {
            let message = format!("no handler registered for task type {}", task.task_type);
            self.dead_letter_unopened(&task, &message).await?;
            return Ok(ExecutionOutcome::NoHandlerRegistered);
        };

        // Step 5: open the attempt's log row.
        let attempt_number = task.retry_count + 1;
        let log = log_db::open_execution_log(
            &self.pool,
            task.id,
            attempt_number,
            instance::instance_id(),
            &task.payload,
        )
        .await?;

        // Step 6: pre-flight validation.
        if let Err(ValidationError(message)) = handler.validate(&task) {
            let mut tx = self.pool.begin().await?;
            log_db::close_execution_log_failure(
                &mut *tx,
                log.id,
                0,
                "VALIDATION_ERROR",
                &message,
                None,
                None,
            )
            .await?;
            task_db::dead_letter_task(&mut *tx, task.id, task.version, &message, None).await?;
            tx.commit().await?;
            self.alert_sink.emit(Alert::task_failure(&task, &message));
            return Ok(ExecutionOutcome::ValidationFailed);
        }

        // Step 7: invoke the handler, catching a panic as a join error.
        let started = Instant::now();
        let outcome = run_handler(handler, task.clone()).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        // Step 8: classify and commit. The log close and the task-row
        // mutation run inside one transaction (§4.3 step atomicity): either
        // both land or neither does, and a rollback just lets the lock
        // expire for the Reaper to reclaim.
        match outcome {
            HandlerOutcome::Success {
                response_payload,
                http_status_code,
            } => {
                let mut tx = self.pool.begin().await?;
                log_db::close_execution_log_success(
                    &mut *tx,
                    log.id,
                    duration_ms,
                    http_status_code,
                    &response_payload,
                )
                .await?;
                task_db::complete_task(&mut *tx, task.id, task.version, duration_ms, &response_payload)
                    .await?;
                tx.commit().await?;
                Ok(ExecutionOutcome::Completed)
            }
            HandlerOutcome::Failure {
                retryable,
                error_type,
                error_message,
                http_status_code,
                stack_trace,
                custom_delay_ms,
            } => {
                if !retryable {
                    let mut tx = self.pool.begin().await?;
                    log_db::close_execution_log_failure(
                        &mut *tx,
                        log.id,
                        duration_ms,
                        &error_type,
                        &error_message,
                        stack_trace.as_deref(),
                        http_status_code,
                    )
                    .await?;
                    task_db::dead_letter_task(
                        &mut *tx,
                        task.id,
                        task.version,
                        &error_message,
                        stack_trace.as_deref(),
                    )
                    .await?;
                    tx.commit().await?;
                    self.alert_sink.emit(Alert::task_failure(&task, &error_message));
                    return Ok(ExecutionOutcome::DeadLettered);
                }

                let effective_max = task.effective_max_retries(config.default_max_retries);
                if attempt_number >= effective_max {
                    let mut tx = self.pool.begin().await?;
                    log_db::close_execution_log_failure(
                        &mut *tx,
                        log.id,
                        duration_ms,
                        &error_type,
                        &error_message,
                        stack_trace.as_deref(),
                        http_status_code,
                    )
                    .await?;
                    task_db::exceed_max_retries(
                        &mut *tx,
                        task.id,
                        task.version,
                        &error_message,
                        stack_trace.as_deref(),
                    )
                    .await?;
                    tx.commit().await?;
                    self.alert_sink
                        .emit(Alert::max_retries_exceeded(&task, &error_message));
                    return Ok(ExecutionOutcome::MaxRetriesExceeded);
                }

                let delay_ms = custom_delay_ms
                    .unwrap_or_else(|| handler.next_retry_delay_ms(&task, config.default_retry_delay_hours));
                let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay_ms);
                let mut tx = self.pool.begin().await?;
                log_db::close_execution_log_failure(
                    &mut *tx,
                    log.id,
                    duration_ms,
                    &error_type,
                    &error_message,
                    stack_trace.as_deref(),
                    http_status_code,
                )
                .await?;
                task_db::schedule_retry(
                    &mut *tx,
                    task.id,
                    task.version,
                    next_attempt_at,
                    &error_message,
                    stack_trace.as_deref(),
                )
                .await?;
                tx.commit().await?;
                Ok(ExecutionOutcome::RetryScheduled { next_attempt_at })
            }
        }
    }

    /// No log row exists yet (no handler was found to run), so there is
    /// nothing to close -- go straight to the task-level commit.
    async fn dead_letter_unopened(&self, task: &Task, message: &str) -> Result<()> {
        task_db::dead_letter_task(&self.pool, task.id, task.version, message, None).await?;
        self.alert_sink.emit(Alert::task_failure(task, message));
        Ok(())
    }
}

/// Run a handler's `execute` on its own tokio task so a panic inside it
/// surfaces as a `JoinError` instead of taking down the poll loop (§4.3 step
/// 9). Folded into a retryable failure tagged `PanicOrIoError`.
async fn run_handler(handler: Arc<dyn crate::handler::Handler>, task: Task) -> HandlerOutcome {
    match tokio::spawn(async move { handler.execute(&task).await }).await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            HandlerOutcome::retryable("PanicOrIoError", format!("handler task panicked: {join_err}"))
        }
    }
}

/// Returns the id of the task just acquired, for callers that only want to
/// know whether the lock was theirs without running the rest of the
/// pipeline (used by tests asserting S2 exclusion).
pub async fn try_acquire_only(
    pool: &sqlx::PgPool,
    task_id: Uuid,
    version: i64,
    lock_duration_minutes: i32,
) -> Result<bool> {
    let rows = task_db::acquire_task_lock(
        pool,
        task_id,
        version,
        instance::instance_id(),
        lock_duration_minutes,
    )
    .await?;
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerOutcome as Outcome;
    use async_trait::async_trait;
    use taskforge_db::models::{Task, TaskType};

    struct PanickingHandler;

    #[async_trait]
    impl crate::handler::Handler for PanickingHandler {
        fn task_type(&self) -> TaskType {
            TaskType::Custom
        }

        fn validate(&self, _task: &Task) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn execute(&self, _task: &Task) -> Outcome {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_handler_becomes_retryable_failure() {
        let handler: Arc<dyn crate::handler::Handler> = Arc::new(PanickingHandler);
        let task = taskforge_db::test_support::sample_task(TaskType::Custom);
        let outcome = run_handler(handler, task).await;
        match outcome {
            Outcome::Failure {
                retryable,
                error_type,
                ..
            } => {
                assert!(retryable);
                assert_eq!(error_type, "PanicOrIoError");
            }
            _ => panic!("expected a retryable failure"),
        }
    }
}
