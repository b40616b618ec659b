use async_trait::async_trait;
use taskforge_db::models::{Task, TaskType};

use super::result::{HandlerOutcome, ValidationError};
use super::trait_def::Handler;

/// Delivers a webhook callback. Unlike the order/payment handlers, the
/// target is not a fixed service base url -- it's carried in the task's own
/// `payload.url` field (§4.4), so this handler only needs a bare client.
pub struct WebhookNotificationHandler {
    client: reqwest::Client,
}

impl WebhookNotificationHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn target_url(task: &Task) -> Option<&str> {
        task.payload.get("url").and_then(|v| v.as_str())
    }
}

#[async_trait]
impl Handler for WebhookNotificationHandler {
    fn task_type(&self) -> TaskType {
        TaskType::WebhookNotification
    }

    fn validate(&self, task: &Task) -> Result<(), ValidationError> {
        match Self::target_url(task) {
            Some(url) if !url.trim().is_empty() => Ok(()),
            _ => Err(ValidationError(
                "payload.url is required for a webhook notification".into(),
            )),
        }
    }

    async fn execute(&self, task: &Task) -> HandlerOutcome {
        // Validated in `validate`, but re-checked since the executor also
        // folds validation failures into this step's contract (§4.3 step 6/7).
        let Some(url) = Self::target_url(task) else {
            return HandlerOutcome::permanent("VALIDATION_ERROR", "payload.url is missing");
        };

        let body = task
            .payload
            .get("body")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let response = match self.client.post(url).json(&body).send().await {
            Ok(r) => r,
            Err(err) => return HandlerOutcome::retryable("WEBHOOK_UNREACHABLE", err.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            let response_payload = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            return HandlerOutcome::success(response_payload, Some(status.as_u16() as i32));
        }

        let body_snippet = response.text().await.unwrap_or_default();
        HandlerOutcome::from_http_status(status, &body_snippet, "WEBHOOK")
    }
}
