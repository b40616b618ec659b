use async_trait::async_trait;
use taskforge_db::models::{Task, TaskType};

use super::result::{HandlerOutcome, ValidationError};
use super::trait_def::Handler;
use super::HttpHandlerConfig;
use crate::backoff;

/// Cancels an order by calling the orders service (§4.4).
pub struct OrderCancelHandler {
    http: HttpHandlerConfig,
}

impl OrderCancelHandler {
    pub fn new(http: HttpHandlerConfig) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Handler for OrderCancelHandler {
    fn task_type(&self) -> TaskType {
        TaskType::OrderCancel
    }

    fn validate(&self, task: &Task) -> Result<(), ValidationError> {
        if task.reference_id.trim().is_empty() {
            return Err(ValidationError("reference_id is required".into()));
        }
        Ok(())
    }

    async fn execute(&self, task: &Task) -> HandlerOutcome {
        let url = format!(
            "{}/orders/{}/cancel",
            self.http.orders_service_url.trim_end_matches('/'),
            task.reference_id
        );

        let response = match self.http.client.post(&url).json(&task.payload).send().await {
            Ok(r) => r,
            Err(err) => return HandlerOutcome::retryable("ORDER_SERVICE_UNREACHABLE", err.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            return HandlerOutcome::success(body, Some(status.as_u16() as i32));
        }

        let body_snippet = response.text().await.unwrap_or_default();
        HandlerOutcome::from_http_status(status, &body_snippet, "ORDER")
    }

    fn next_retry_delay_ms(&self, task: &Task, default_delay_hours: i32) -> i64 {
        let base = backoff::order_cancel_base_ms(task.retry_count, default_delay_hours);
        backoff::with_jitter(base)
    }
}
