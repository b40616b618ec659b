//! The single contract between handlers and the executor (§9): a plain enum
//! rather than an exception hierarchy.

/// Raised by [`super::Handler::validate`] for pre-flight rejections.
#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// What a handler's `execute` call produced (§4.3 step 7).
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success {
        response_payload: serde_json::Value,
        http_status_code: Option<i32>,
    },
    Failure {
        retryable: bool,
        error_type: String,
        error_message: String,
        http_status_code: Option<i32>,
        stack_trace: Option<String>,
        /// Overrides the handler's backoff formula when present (§4.3 step 8d).
        custom_delay_ms: Option<i64>,
    },
}

impl HandlerOutcome {
    pub fn success(response_payload: serde_json::Value, http_status_code: Option<i32>) -> Self {
        Self::Success {
            response_payload,
            http_status_code,
        }
    }

    pub fn retryable(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::Failure {
            retryable: true,
            error_type: error_type.into(),
            error_message: error_message.into(),
            http_status_code: None,
            stack_trace: None,
            custom_delay_ms: None,
        }
    }

    pub fn permanent(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::Failure {
            retryable: false,
            error_type: error_type.into(),
            error_message: error_message.into(),
            http_status_code: None,
            stack_trace: None,
            custom_delay_ms: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        if let Self::Failure {
            http_status_code, ..
        } = &mut self
        {
            *http_status_code = Some(status as i32);
        }
        self
    }

    /// Classify a remote HTTP response per the default policy (§4.4 table).
    /// `prefix` lets each handler name its own `*_NOT_FOUND` and
    /// `*_STATE_CONFLICT` error types (e.g. `ORDER_NOT_FOUND` /
    /// `ORDER_STATE_CONFLICT`, `PAYMENT_NOT_FOUND` / `PAYMENT_STATE_CONFLICT`).
    pub fn from_http_status(status: reqwest::StatusCode, body_snippet: &str, prefix: &str) -> Self {
        let code = status.as_u16();
        match code {
            404 => Self::permanent(format!("{prefix}_NOT_FOUND"), body_snippet).with_http_status(code),
            409 => Self::permanent(format!("{prefix}_STATE_CONFLICT"), body_snippet).with_http_status(code),
            400 => Self::permanent("VALIDATION_ERROR", body_snippet).with_http_status(code),
            422 => Self::permanent("BUSINESS_RULE_VIOLATION", body_snippet).with_http_status(code),
            408 | 429 => {
                Self::retryable(format!("HTTP_{code}"), body_snippet).with_http_status(code)
            }
            c if c >= 500 => {
                Self::retryable(format!("HTTP_{code}"), body_snippet).with_http_status(code)
            }
            _ => Self::retryable("UNEXPECTED_STATUS", body_snippet).with_http_status(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_permanent() {
        let outcome =
            HandlerOutcome::from_http_status(reqwest::StatusCode::NOT_FOUND, "missing", "ORDER");
        match outcome {
            HandlerOutcome::Failure { retryable, error_type, .. } => {
                assert!(!retryable);
                assert_eq!(error_type, "ORDER_NOT_FOUND");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn conflict_is_permanent_and_tagged_with_the_handler_prefix() {
        let outcome =
            HandlerOutcome::from_http_status(reqwest::StatusCode::CONFLICT, "already refunded", "PAYMENT");
        match outcome {
            HandlerOutcome::Failure { retryable, error_type, .. } => {
                assert!(!retryable);
                assert_eq!(error_type, "PAYMENT_STATE_CONFLICT");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn server_error_is_retryable() {
        let outcome =
            HandlerOutcome::from_http_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down", "ORDER");
        match outcome {
            HandlerOutcome::Failure { retryable, error_type, .. } => {
                assert!(retryable);
                assert_eq!(error_type, "HTTP_503");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn too_many_requests_is_retryable() {
        let outcome = HandlerOutcome::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            "PAYMENT",
        );
        assert!(matches!(
            outcome,
            HandlerOutcome::Failure { retryable: true, .. }
        ));
    }
}
