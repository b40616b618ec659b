//! Outbound alerting (§4.6). Three alert kinds, delivered best-effort to a
//! chat webhook. Emission is fire-and-forget -- a detached `tokio::spawn`
//! with an internal timeout and a swallowed/logged error, so a flaky alert
//! sink can never block or fail a task commit.

use std::time::Duration;

use taskforge_db::models::{Priority, Task, TaskType};

use crate::config::AlertConfig;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One of the three alert kinds the engine emits.
#[derive(Debug, Clone)]
pub enum Alert {
    /// Always emitted when a retryable failure exhausts its retry ceiling
    /// (§4.3 step 8c).
    MaxRetriesExceeded {
        task_id: uuid::Uuid,
        task_type: TaskType,
        reference_id: String,
        retry_count: i32,
        last_error: String,
    },
    /// Emitted on a permanent failure iff the task's priority is `>= HIGH`
    /// (§4.3 step 8b).
    TaskFailure {
        task_id: uuid::Uuid,
        task_type: TaskType,
        reference_id: String,
        priority: Priority,
        error: String,
    },
    /// Reserved for engine-internal failures, not tied to a task.
    GenericError {
        title: String,
        body: String,
        details: Option<serde_json::Value>,
    },
}

impl Alert {
    /// Build a `TaskFailure` alert from the task the executor just
    /// dead-lettered, plus the error message that caused it.
    pub fn task_failure(task: &Task, error: impl Into<String>) -> Self {
        Self::TaskFailure {
            task_id: task.id,
            task_type: task.task_type,
            reference_id: task.reference_id.clone(),
            priority: task.priority,
            error: error.into(),
        }
    }

    /// Build a `MaxRetriesExceeded` alert from the task whose retry ceiling
    /// the executor just hit, plus the final error message.
    pub fn max_retries_exceeded(task: &Task, error: impl Into<String>) -> Self {
        Self::MaxRetriesExceeded {
            task_id: task.id,
            task_type: task.task_type,
            reference_id: task.reference_id.clone(),
            retry_count: task.retry_count + 1,
            last_error: error.into(),
        }
    }

    /// Whether this alert should be emitted at all, given priority gating
    /// (`TaskFailure` is only alerted `iff priority >= HIGH`, §4.3 step 8b).
    fn should_emit(&self) -> bool {
        match self {
            Self::TaskFailure { priority, .. } => *priority >= Priority::High,
            Self::MaxRetriesExceeded { .. } | Self::GenericError { .. } => true,
        }
    }

    fn webhook_payload(&self, channel: Option<&str>) -> serde_json::Value {
        let (title, text) = match self {
            Self::MaxRetriesExceeded {
                task_id,
                task_type,
                reference_id,
                retry_count,
                last_error,
            } => (
                "Task retries exhausted".to_string(),
                format!(
                    "task {task_id} ({task_type}, ref={reference_id}) exceeded its retry \
                     ceiling after {retry_count} attempts: {last_error}"
                ),
            ),
            Self::TaskFailure {
                task_id,
                task_type,
                reference_id,
                priority,
                error,
            } => (
                "Task failed permanently".to_string(),
                format!(
                    "task {task_id} ({task_type}, priority={priority}, ref={reference_id}) \
                     was dead-lettered: {error}"
                ),
            ),
            Self::GenericError { title, body, .. } => (title.clone(), body.clone()),
        };

        serde_json::json!({
            "channel": channel,
            "title": title,
            "text": text,
        })
    }
}

/// Delivers [`Alert`]s to the configured webhook. Cloneable -- cheap to
/// hand to every spawned executor task.
#[derive(Debug, Clone)]
pub struct AlertSink {
    config: AlertConfig,
    client: reqwest::Client,
}

impl AlertSink {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .expect("reqwest client with static config should build"),
        }
    }

    /// Fire-and-forget emission (§4.6). Never blocks the caller and never
    /// surfaces a delivery failure -- it is only logged.
    pub fn emit(&self, alert: Alert) {
        if !self.config.enabled || !alert.should_emit() {
            return;
        }
        let Some(url) = self.config.webhook_url.clone() else {
            tracing::warn!("alert_enabled is true but no alert_webhook_url is configured");
            return;
        };

        let payload = alert.webhook_payload(self.config.channel.as_deref());
        let client = self.client.clone();

        tokio::spawn(async move {
            let send = client.post(&url).json(&payload).send();
            match tokio::time::timeout(DELIVERY_TIMEOUT, send).await {
                Ok(Ok(response)) if response.status().is_success() => {}
                Ok(Ok(response)) => {
                    tracing::warn!(status = %response.status(), "alert webhook returned non-success status");
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "failed to deliver alert");
                }
                Err(_) => {
                    tracing::warn!("alert webhook delivery timed out");
                }
            }
        });
    }
}
