//! Database query functions for `cluster_mutex`, the upsert-with-conditional-
//! expiry row used to serialize the Poller and the Stale-Lock Reaper across
//! replicas (S3).

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Try to acquire (or renew) the named mutex for `lease_minutes`.
///
/// Succeeds if the row does not exist yet, or if it exists but its lease has
/// already expired. Returns `true` when the caller now holds the lock.
pub async fn try_acquire(
    pool: &PgPool,
    name: &str,
    owner: &str,
    lease_minutes: i32,
) -> Result<bool> {
    let acquired: Option<(String,)> = sqlx::query_as(
        "INSERT INTO cluster_mutex (name, lock_until, locked_at, locked_by) \
         VALUES ($1, now() + make_interval(mins => $2), now(), $3) \
         ON CONFLICT (name) DO UPDATE \
           SET lock_until = EXCLUDED.lock_until, \
               locked_at = EXCLUDED.locked_at, \
               locked_by = EXCLUDED.locked_by \
         WHERE cluster_mutex.lock_until < now() \
         RETURNING name",
    )
    .bind(name)
    .bind(lease_minutes)
    .bind(owner)
    .fetch_optional(pool)
    .await
    .context("failed to acquire cluster mutex")?;

    Ok(acquired.is_some())
}

/// Release the mutex early so the next tick does not wait out the full
/// lease. Best-effort: only releases if `owner` still holds it.
pub async fn release(pool: &PgPool, name: &str, owner: &str) -> Result<()> {
    sqlx::query("UPDATE cluster_mutex SET lock_until = now() WHERE name = $1 AND locked_by = $2")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await
        .context("failed to release cluster mutex")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Exercised against a real Postgres in taskforge-db/tests/cluster_mutex_test.rs
    // (upsert semantics are not meaningfully testable without a server).
}
