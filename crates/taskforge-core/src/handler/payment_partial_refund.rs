use async_trait::async_trait;
use taskforge_db::models::{Task, TaskType};

use super::result::{HandlerOutcome, ValidationError};
use super::trait_def::Handler;
use super::HttpHandlerConfig;
use crate::backoff;

/// Partially refunds a payment. Shares the refund endpoint with
/// [`super::PaymentRefundHandler`]; the `amount` field in `payload`
/// distinguishes the two at the payments service (§4.4).
pub struct PaymentPartialRefundHandler {
    http: HttpHandlerConfig,
}

impl PaymentPartialRefundHandler {
    pub fn new(http: HttpHandlerConfig) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Handler for PaymentPartialRefundHandler {
    fn task_type(&self) -> TaskType {
        TaskType::PaymentPartialRefund
    }

    fn validate(&self, task: &Task) -> Result<(), ValidationError> {
        if task.reference_id.trim().is_empty() {
            return Err(ValidationError("reference_id is required".into()));
        }
        match task.payload.get("amount") {
            Some(v) if v.is_number() => Ok(()),
            _ => Err(ValidationError(
                "payload.amount must be present and numeric".into(),
            )),
        }
    }

    async fn execute(&self, task: &Task) -> HandlerOutcome {
        let url = format!(
            "{}/payments/{}/refund",
            self.http.payments_service_url.trim_end_matches('/'),
            task.reference_id
        );

        let response = match self.http.client.post(&url).json(&task.payload).send().await {
            Ok(r) => r,
            Err(err) => {
                return HandlerOutcome::retryable("PAYMENT_SERVICE_UNREACHABLE", err.to_string())
            }
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
        HandlerOutcome::from_http_status(status, &body_snippet, "PAYMENT")
    }

    fn next_retry_delay_ms(&self, task: &Task, default_delay_hours: i32) -> i64 {
        let base = backoff::payment_base_ms(task.retry_count, default_delay_hours);
        backoff::with_jitter(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> PaymentPartialRefundHandler {
        PaymentPartialRefundHandler::new(HttpHandlerConfig::new("http://orders", "http://payments"))
    }

    #[test]
    fn rejects_missing_amount() {
        let task = taskforge_db::test_support::sample_task(TaskType::PaymentPartialRefund);
        assert!(handler().validate(&task).is_err());
    }

    #[test]
    fn accepts_numeric_amount() {
        let mut task = taskforge_db::test_support::sample_task(TaskType::PaymentPartialRefund);
        task.payload = serde_json::json!({"amount": 25.5});
        assert!(handler().validate(&task).is_ok());
    }

    #[test]
    fn rejects_non_numeric_amount() {
        let mut task = taskforge_db::test_support::sample_task(TaskType::PaymentPartialRefund);
        task.payload = serde_json::json!({"amount": "lots"});
        assert!(handler().validate(&task).is_err());
    }
}
