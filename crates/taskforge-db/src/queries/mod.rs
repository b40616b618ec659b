//! Query functions grouped by table. Each submodule takes a `&PgPool` (or an
//! open `&mut Transaction`) and returns `anyhow::Result`, matching the rest of
//! the crate's error-handling convention.

pub mod cluster_mutex;
pub mod execution_logs;
pub mod tasks;
