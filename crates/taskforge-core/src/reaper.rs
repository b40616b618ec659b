//! The Stale-Lock Reaper (§4.5): reclaims tasks whose `PROCESSING` lock has
//! outlived `stale_task_threshold_minutes`, almost always because the
//! replica holding it crashed or was killed mid-attempt. Guarded by its own
//! cluster mutex so only one replica reaps at a time.

use taskforge_db::queries::{cluster_mutex, tasks as task_db};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::instance;

/// Name of the cluster-wide mutex row the Reaper claims each tick.
pub const MUTEX_NAME: &str = "staleTaskCleanup";

pub struct Reaper {
    pool: sqlx::PgPool,
    config: EngineConfig,
}

impl Reaper {
    pub fn new(pool: sqlx::PgPool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Run ticks on `config.stale_check_interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.stale_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "reaper tick failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single reap pass. Returns the ids reclaimed, for callers (and
    /// tests) that want to assert on the result directly.
    pub async fn tick(&self) -> anyhow::Result<Vec<uuid::Uuid>> {
        let owner = instance::instance_id();
        let lease_minutes = self
            .config
            .stale_check_interval
            .as_secs()
            .div_ceil(60)
            .max(1) as i32;

        let acquired = cluster_mutex::try_acquire(&self.pool, MUTEX_NAME, owner, lease_minutes).await?;
        if !acquired {
            return Ok(Vec::new());
        }

        let reaped = task_db::reap_stale_tasks(&self.pool, self.config.stale_task_threshold_minutes).await?;
        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), "reaped stale locked tasks");
        }

        cluster_mutex::release(&self.pool, MUTEX_NAME, owner).await?;
        Ok(reaped)
    }
}
