//! The Poller (§4.2): on each tick, claims the `taskPollingJob` cluster
//! mutex, fetches a batch of ready tasks, and spawns one executor per task
//! bounded by a semaphore sized to `executor_pool_size`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taskforge_db::queries::{cluster_mutex, tasks as task_db};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::executor::{Executor, ExecutionOutcome};
use crate::instance;

/// Name of the cluster-wide mutex row the Poller claims each tick.
pub const MUTEX_NAME: &str = "taskPollingJob";

/// Runs the Poller's tick loop until `shutdown` fires.
pub struct Poller {
    pool: sqlx::PgPool,
    executor: Executor,
    config: EngineConfig,
    /// Local single-flight guard: a tick that is still draining its batch
    /// skips the next timer fire rather than overlapping with itself. The
    /// cluster mutex already prevents cross-replica overlap; this prevents
    /// a slow batch on the same replica from doing the same.
    ticking: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(pool: sqlx::PgPool, executor: Executor, config: EngineConfig) -> Self {
        Self {
            pool,
            executor,
            config,
            ticking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run ticks on `config.poll_interval` until `shutdown` is cancelled.
    /// Does not return before the in-flight tick (if any) drains.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.cancelled() => {
                    tracing::info!("poller shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single tick: claim the cluster mutex, fetch, spawn, drain.
    pub async fn tick(&self) {
        if self.ticking.swap(true, Ordering::SeqCst) {
            tracing::debug!("skipping poll tick, previous tick still draining");
            return;
        }
        let result = self.tick_inner().await;
        self.ticking.store(false, Ordering::SeqCst);

        if let Err(err) = result {
            tracing::error!(error = %err, "poll tick failed");
        }
    }

    async fn tick_inner(&self) -> anyhow::Result<()> {
        let owner = instance::instance_id();
        let lease_minutes = mutex_lease_minutes(self.config.lock_duration_minutes);
        let acquired = cluster_mutex::try_acquire(&self.pool, MUTEX_NAME, owner, lease_minutes).await?;
        if !acquired {
            return Ok(());
        }

        let tasks = task_db::fetch_ready_tasks(&self.pool, self.config.batch_size).await?;
        if tasks.is_empty() {
            cluster_mutex::release(&self.pool, MUTEX_NAME, owner).await?;
            return Ok(());
        }
        tracing::info!(count = tasks.len(), "fetched ready tasks");

        let semaphore = Arc::new(Semaphore::new(self.config.executor_pool_size));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let executor = self.executor.clone();
            let config = self.config.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed while the poller runs");
                let task_id = task.id;
                match executor.execute_task(task, &config).await {
                    Ok(outcome) => log_outcome(task_id, &outcome),
                    Err(err) => tracing::error!(task_id = %task_id, error = %err, "task execution failed"),
                }
            }));
        }

        for handle in handles {
            if let Err(join_err) = handle.await {
                tracing::error!(error = %join_err, "executor task panicked");
            }
        }

        cluster_mutex::release(&self.pool, MUTEX_NAME, owner).await?;
        Ok(())
    }
}

/// Lease for the `taskPollingJob` mutex: at least 5 minutes (§4.2), and long
/// enough to outlast the worst-case tick, which awaits its whole batch and
/// so can run as long as a single task's lock (`lock_duration_minutes`) when
/// a handler blocks (§5).
fn mutex_lease_minutes(lock_duration_minutes: i32) -> i32 {
    (lock_duration_minutes + 1).max(5)
}

fn log_outcome(task_id: uuid::Uuid, outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::LockLost => tracing::debug!(task_id = %task_id, "lock lost to another replica"),
        ExecutionOutcome::Expired => tracing::info!(task_id = %task_id, "task expired"),
        ExecutionOutcome::NotExecutable => tracing::warn!(task_id = %task_id, "task no longer executable after lock"),
        ExecutionOutcome::NoHandlerRegistered => {
            tracing::error!(task_id = %task_id, "no handler registered for task type")
        }
        ExecutionOutcome::ValidationFailed => tracing::warn!(task_id = %task_id, "task failed validation"),
        ExecutionOutcome::Completed => tracing::info!(task_id = %task_id, "task completed"),
        ExecutionOutcome::DeadLettered => tracing::warn!(task_id = %task_id, "task dead-lettered"),
        ExecutionOutcome::MaxRetriesExceeded => {
            tracing::warn!(task_id = %task_id, "task exceeded max retries")
        }
        ExecutionOutcome::RetryScheduled { next_attempt_at } => {
            tracing::info!(task_id = %task_id, next_attempt_at = %next_attempt_at, "retry scheduled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_minutes_has_a_five_minute_floor_independent_of_lock_duration() {
        assert_eq!(mutex_lease_minutes(1), 5);
        assert_eq!(mutex_lease_minutes(4), 5);
    }

    #[test]
    fn lease_minutes_outlasts_the_configured_lock_duration() {
        assert_eq!(mutex_lease_minutes(30), 31);
        assert_eq!(mutex_lease_minutes(60), 61);
    }
}
