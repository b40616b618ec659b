use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of side-effect a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    OrderCancel,
    PaymentRefund,
    PaymentPartialRefund,
    PaymentVoid,
    WebhookNotification,
    Custom,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OrderCancel => "ORDER_CANCEL",
            Self::PaymentRefund => "PAYMENT_REFUND",
            Self::PaymentPartialRefund => "PAYMENT_PARTIAL_REFUND",
            Self::PaymentVoid => "PAYMENT_VOID",
            Self::WebhookNotification => "WEBHOOK_NOTIFICATION",
            Self::Custom => "CUSTOM",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_CANCEL" => Ok(Self::OrderCancel),
            "PAYMENT_REFUND" => Ok(Self::PaymentRefund),
            "PAYMENT_PARTIAL_REFUND" => Ok(Self::PaymentPartialRefund),
            "PAYMENT_VOID" => Ok(Self::PaymentVoid),
            "WEBHOOK_NOTIFICATION" => Ok(Self::WebhookNotification),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(ParseEnumError::new("task type", other)),
        }
    }
}

/// Task priority. The wire representation is the integer rank so that SQL
/// `ORDER BY priority DESC` gives the right order without a CASE expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Priority {
    pub fn rank(self) -> i32 {
        self as i32
    }

    pub fn from_rank(rank: i32) -> Option<Self> {
        match rank {
            1 => Some(Self::Low),
            5 => Some(Self::Normal),
            8 => Some(Self::High),
            10 => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(ParseEnumError::new("priority", other)),
        }
    }
}

// sqlx maps this enum onto a plain `integer` column via the rank, since the
// ordering guarantee (§5) depends on numeric comparison rather than a
// Postgres enum's declaration order.
impl sqlx::Type<sqlx::Postgres> for Priority {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i32 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Priority {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let rank = <i32 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Priority::from_rank(rank).ok_or_else(|| format!("invalid priority rank: {rank}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for Priority {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i32 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.rank(), buf)
    }
}

/// Status of a task (§3). Terminal statuses per invariant I2 are `Completed`,
/// `Cancelled`, `Expired`, `MaxRetriesExceeded`, `DeadLetter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    RetryPending,
    MaxRetriesExceeded,
    Cancelled,
    Paused,
    Expired,
    DeadLetter,
}

impl TaskStatus {
    /// Terminal statuses are never re-read for execution and never
    /// transition again (I2).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Cancelled
                | Self::Expired
                | Self::MaxRetriesExceeded
                | Self::DeadLetter
        )
    }

    /// Statuses the poller's fetch predicate considers ready to run (§4.2).
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Scheduled | Self::Failed | Self::RetryPending
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RetryPending => "RETRY_PENDING",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::Paused => "PAUSED",
            Self::Expired => "EXPIRED",
            Self::DeadLetter => "DEAD_LETTER",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SCHEDULED" => Ok(Self::Scheduled),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "RETRY_PENDING" => Ok(Self::RetryPending),
            "MAX_RETRIES_EXCEEDED" => Ok(Self::MaxRetriesExceeded),
            "CANCELLED" => Ok(Self::Cancelled),
            "PAUSED" => Ok(Self::Paused),
            "EXPIRED" => Ok(Self::Expired),
            "DEAD_LETTER" => Ok(Self::DeadLetter),
            other => Err(ParseEnumError::new("task status", other)),
        }
    }
}

/// Terminal status of a single execution attempt, recorded on the
/// `ExecutionLog` row once the attempt concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Generic parse error shared by this module's small string enums.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// How `insert_task` behaves when `reference_id`/`task_type` duplicate
/// prevention is requested and an existing non-terminal task already
/// matches (I5). Resolves the "what happens on duplicate" open question:
/// callers opt into one policy explicitly rather than the engine guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicatePolicy {
    /// Creation fails, naming the existing task id.
    #[default]
    Reject,
    /// Creation is idempotent: the existing row is returned unchanged.
    ReturnExisting,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- the primary persisted entity (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub priority: Priority,
    pub reference_id: String,
    pub secondary_reference_id: Option<String>,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub scheduled_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cron_expression: Option<String>,
    pub retry_count: i32,
    pub max_retries: Option<i32>,
    pub retry_delay_hours: Option<i32>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_duration_ms: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_stack_trace: Option<String>,
    pub execution_result: Option<serde_json::Value>,
}

impl Task {
    /// `max_retries` falling back to the engine-wide default (§6
    /// `default_max_retries`) when the task did not override it.
    pub fn effective_max_retries(&self, default_max_retries: i32) -> i32 {
        self.max_retries.unwrap_or(default_max_retries)
    }

    /// `retry_delay_hours` falling back to the engine-wide default (§6
    /// `default_retry_delay_hours`).
    pub fn effective_retry_delay_hours(&self, default_retry_delay_hours: i32) -> i32 {
        self.retry_delay_hours.unwrap_or(default_retry_delay_hours)
    }
}

/// One row per execution attempt, append-only (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub executor_instance: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub error_type: Option<String>,
    pub http_status_code: Option<i32>,
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
}

/// Maximum length (bytes) a stack trace is truncated to before storage (§3).
pub const MAX_STACK_TRACE_BYTES: usize = 4 * 1024;

/// Truncate a stack trace to [`MAX_STACK_TRACE_BYTES`], splitting on a char
/// boundary so the result is always valid UTF-8.
pub fn truncate_stack_trace(trace: &str) -> String {
    if trace.len() <= MAX_STACK_TRACE_BYTES {
        return trace.to_owned();
    }
    let mut end = MAX_STACK_TRACE_BYTES;
    while !trace.is_char_boundary(end) {
        end -= 1;
    }
    trace[..end].to_owned()
}

/// A named cluster-wide mutex row, used to serialize the Poller and the
/// Stale-Lock Reaper across replicas (§3, §4.1 S3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClusterMutex {
    pub name: String,
    pub lock_until: DateTime<Utc>,
    pub locked_at: DateTime<Utc>,
    pub locked_by: String,
}
