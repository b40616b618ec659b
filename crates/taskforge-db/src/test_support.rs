//! Throwaway `Task` construction for other crates' tests. Not part of the
//! public API surface proper -- gated behind `test-support` so production
//! builds never pull it in.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{Priority, Task, TaskStatus, TaskType};

/// A `Task` with sane defaults for `task_type`, everything else neutral.
/// Callers override whatever field their test cares about.
pub fn sample_task(task_type: TaskType) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        task_type,
        priority: Priority::Normal,
        reference_id: "REF-1".to_string(),
        secondary_reference_id: None,
        description: None,
        status: TaskStatus::Pending,
        payload: serde_json::json!({}),
        metadata: serde_json::json!({}),
        scheduled_time: now,
        expires_at: None,
        cron_expression: None,
        retry_count: 0,
        max_retries: None,
        retry_delay_hours: None,
        locked_by: None,
        locked_until: None,
        version: 0,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
        execution_duration_ms: None,
        last_error: None,
        last_error_stack_trace: None,
        execution_result: None,
    }
}
