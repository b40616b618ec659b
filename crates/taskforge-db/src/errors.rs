//! Typed errors the query layer returns when the caller must branch on the
//! outcome rather than just log-and-bail. Everything else uses
//! `anyhow::Result` per the crate's convention.

use uuid::Uuid;

/// Errors surfaced by the task CRUD and lifecycle-transition queries.
#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    /// Raised by `insert_task` under `DuplicatePolicy::Reject` (I5).
    #[error("a non-terminal task already exists for this reference_id/type: {0}")]
    Duplicate(Uuid),

    /// A state-command precondition failed (e.g. cancelling a locked task).
    #[error("task {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },
}
