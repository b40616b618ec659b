//! The `Handler` trait, its registry, the order-cancel/payment/webhook
//! handlers, and the outcome envelope they return to the executor.

mod order_cancel;
mod payment_partial_refund;
mod payment_refund;
mod payment_void;
mod registry;
mod result;
mod trait_def;
mod webhook_notification;

pub use order_cancel::OrderCancelHandler;
pub use payment_partial_refund::PaymentPartialRefundHandler;
pub use payment_refund::PaymentRefundHandler;
pub use payment_void::PaymentVoidHandler;
pub use registry::HandlerRegistry;
pub use result::{HandlerOutcome, ValidationError};
pub use trait_def::Handler;
pub use webhook_notification::WebhookNotificationHandler;

/// Base URLs and shared client config for the built-in HTTP-backed handlers.
#[derive(Debug, Clone)]
pub struct HttpHandlerConfig {
    pub orders_service_url: String,
    pub payments_service_url: String,
    /// Pre-built so callers may wrap it with their own retry/circuit-breaker
    /// middleware; the engine only inspects the final `Result` (§6).
    pub client: reqwest::Client,
}

impl HttpHandlerConfig {
    pub fn new(orders_service_url: impl Into<String>, payments_service_url: impl Into<String>) -> Self {
        Self {
            orders_service_url: orders_service_url.into(),
            payments_service_url: payments_service_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client with static config should build"),
        }
    }
}

/// Build a registry with the five built-in handlers (§4.4). `CUSTOM` has no
/// built-in handler; embedding applications register their own.
pub fn default_registry(http: HttpHandlerConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(OrderCancelHandler::new(http.clone()));
    registry.register(PaymentRefundHandler::new(http.clone()));
    registry.register(PaymentPartialRefundHandler::new(http.clone()));
    registry.register(PaymentVoidHandler::new(http.clone()));
    registry.register(WebhookNotificationHandler::new(http.client.clone()));
    registry
}
