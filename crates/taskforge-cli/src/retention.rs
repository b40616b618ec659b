//! `taskforge retention-sweep`: a maintenance CLI subcommand that deletes
//! terminal tasks (and, via `ON DELETE CASCADE`, their execution logs) older
//! than `retention_days`. Out of the scheduling core's hot path, in the
//! spirit of a garbage-collection pass run on a cron outside the replica
//! fleet.

use anyhow::Result;
use sqlx::PgPool;
use taskforge_db::queries::tasks as task_db;

pub async fn run_retention_sweep(pool: &PgPool, retention_days: i32) -> Result<()> {
    let deleted = task_db::delete_terminal_tasks_older_than(pool, retention_days).await?;
    println!("Swept {deleted} terminal task(s) older than {retention_days} day(s).");
    Ok(())
}
