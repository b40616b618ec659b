//! The `Handler` trait -- the adapter interface for task-type-specific side
//! effects.
//!
//! Each concrete handler (order cancel, payment refund, ...) implements this
//! trait. Object-safe so it can be stored as `Arc<dyn Handler>` in the
//! [`super::HandlerRegistry`].

use async_trait::async_trait;
use taskforge_db::models::{Task, TaskType};

use super::result::{HandlerOutcome, ValidationError};

/// Adapter interface for executing a task's external side effect.
///
/// # Object Safety
///
/// Every method returns a concrete or boxed type, so `Arc<dyn Handler>` can
/// be stored in [`super::HandlerRegistry`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// The task type this handler is registered for.
    fn task_type(&self) -> TaskType;

    /// Pre-flight validation. Domain rejections return `Err`, which the
    /// executor treats as a permanent failure (§4.3 step 6).
    fn validate(&self, task: &Task) -> Result<(), ValidationError>;

    /// Perform the side effect (§4.3 step 7). Must not panic for domain
    /// outcomes -- those become `HandlerOutcome::Failure`. Transport errors
    /// are folded into a retryable failure by the implementation.
    async fn execute(&self, task: &Task) -> HandlerOutcome;

    /// Compute the delay before the next attempt, given the engine-wide
    /// default (hours). The default implementation applies no backoff
    /// curve; handlers override to implement §4.4's formulas plus jitter.
    fn next_retry_delay_ms(&self, task: &Task, default_delay_hours: i32) -> i64 {
        let hours = task.effective_retry_delay_hours(default_delay_hours);
        i64::from(hours) * 3_600_000
    }
}

// Compile-time assertion: Handler must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Handler) {}
};
