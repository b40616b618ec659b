//! The Operator API (§6 [SUPPLEMENT]): a thin axum HTTP surface over the
//! store. Scheduling and locking stay in `taskforge-core`; every
//! state-changing route is a direct call into `taskforge-db`'s query layer
//! under the same invariants the Executor relies on, except `retry-now`,
//! which additionally runs one synchronous `Executor::execute_task` call so
//! the dispatch happens inline with the request instead of waiting for the
//! next poll tick.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use taskforge_core::config::EngineConfig;
use taskforge_core::executor::Executor;
use taskforge_db::models::{DuplicatePolicy, Priority, Task, TaskStatus, TaskType};
use taskforge_db::queries::{execution_logs as log_db, tasks as task_db};

/// Shared router state: the pool (for plain read/command queries) plus an
/// `Executor` (for `retry-now`'s synchronous dispatch) and the engine config
/// its backoff/retry-ceiling math depends on.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub executor: Executor,
    pub engine_config: EngineConfig,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Maps a `TaskStoreError::Duplicate` surfaced through `anyhow` into a 409;
/// everything else becomes a 500.
fn classify_insert_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<taskforge_db::errors::TaskStoreError>() {
        Some(taskforge_db::errors::TaskStoreError::Duplicate(existing_id)) => {
            AppError::conflict(format!("duplicate task, existing id: {existing_id}"))
        }
        _ => AppError::internal(err),
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: TaskType,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub reference_id: String,
    pub secondary_reference_id: Option<String>,
    pub description: Option<String>,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    #[serde(default = "default_payload")]
    pub metadata: serde_json::Value,
    pub scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cron_expression: Option<String>,
    pub max_retries: Option<i32>,
    pub retry_delay_hours: Option<i32>,
    pub duplicate_policy: Option<DuplicatePolicy>,
}

fn default_priority() -> Priority {
    Priority::Normal
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub reference_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled via operator API".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub counts: Vec<StatCount>,
}

#[derive(Debug, Serialize)]
pub struct StatCount {
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/logs", get(get_task_logs))
        .route("/api/stats", get(get_stats))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/tasks/{id}/retry-now", post(retry_task_now))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the Operator API until `shutdown` fires.
pub async fn run_serve(state: AppState, bind: &str, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!(%addr, "operator API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("operator API shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_task(
    State(pool): State<PgPool>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<axum::response::Response, AppError> {
    if req.reference_id.trim().is_empty() {
        return Err(AppError::bad_request("reference_id must not be blank"));
    }

    let task = task_db::insert_task(
        &pool,
        task_db::NewTask {
            task_type: req.task_type,
            priority: req.priority,
            reference_id: req.reference_id,
            secondary_reference_id: req.secondary_reference_id,
            description: req.description,
            payload: req.payload,
            metadata: req.metadata,
            scheduled_time: req.scheduled_time,
            expires_at: req.expires_at,
            cron_expression: req.cron_expression,
            max_retries: req.max_retries,
            retry_delay_hours: req.retry_delay_hours,
            duplicate_policy: req.duplicate_policy,
        },
    )
    .await
    .map_err(classify_insert_error)?;

    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn get_task(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    Ok(Json(task).into_response())
}

async fn list_tasks(
    State(pool): State<PgPool>,
    Query(query): Query<ListTasksQuery>,
) -> Result<axum::response::Response, AppError> {
    let mut filter = task_db::TaskFilter::new();
    filter.task_type = query.task_type;
    filter.status = query.status;
    filter.reference_id = query.reference_id;
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }
    if let Some(offset) = query.offset {
        filter.offset = offset;
    }

    let tasks: Vec<Task> = task_db::search_tasks(&pool, &filter)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(tasks).into_response())
}

async fn get_task_logs(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    // 404 if the task itself doesn't exist, rather than silently returning
    // an empty log list for a typo'd id.
    task_db::get_task(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let logs = log_db::list_logs_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(logs).into_response())
}

async fn get_stats(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let counts = task_db::task_stats(&pool).await.map_err(AppError::internal)?;
    let counts = counts
        .into_iter()
        .map(|c| StatCount {
            task_type: c.task_type,
            status: c.status,
            count: c.count,
        })
        .collect();
    Ok(Json(StatsResponse { counts }).into_response())
}

async fn cancel_task(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<axum::response::Response, AppError> {
    let reason = body.map(|Json(r)| r.reason).unwrap_or_else(default_cancel_reason);
    let rows = task_db::cancel_task(&pool, id, &reason)
        .await
        .map_err(AppError::internal)?;
    require_affected(rows, id, "cancel")
}

async fn pause_task(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let rows = task_db::pause_task(&pool, id).await.map_err(AppError::internal)?;
    require_affected(rows, id, "pause")
}

async fn resume_task(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let rows = task_db::resume_task(&pool, id).await.map_err(AppError::internal)?;
    require_affected(rows, id, "resume")
}

async fn retry_task(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    body: Option<Json<RetryRequest>>,
) -> Result<axum::response::Response, AppError> {
    let scheduled_time = body.and_then(|Json(r)| r.scheduled_time);
    let rows = task_db::retry_task(&pool, id, scheduled_time)
        .await
        .map_err(AppError::internal)?;
    require_affected(rows, id, "retry")
}

/// Reset the task to `PENDING` (same precondition as `retry`) and then run
/// one synchronous dispatch cycle for it directly through the `Executor`,
/// rather than leaving it for the next poll tick (§6).
async fn retry_task_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let rows = task_db::retry_task_now(&state.pool, id)
        .await
        .map_err(AppError::internal)?;
    if rows == 0 {
        return require_affected(rows, id, "retry-now");
    }

    let task = task_db::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let outcome = state
        .executor
        .execute_task(task, &state.engine_config)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(task_id = %id, ?outcome, "retry-now dispatched synchronously");

    let task = task_db::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    Ok(Json(task).into_response())
}

/// Translate a zero-row update into a 409: the task exists but failed the
/// command's precondition (wrong status, or currently locked).
fn require_affected(rows: u64, id: Uuid, command: &str) -> Result<axum::response::Response, AppError> {
    if rows == 0 {
        return Err(AppError::conflict(format!(
            "task {id} could not be {command}'d: not found, locked, or in a non-eligible status"
        )));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use taskforge_core::alert::AlertSink;
    use taskforge_core::config::{AlertConfig, EngineConfig};
    use taskforge_core::handler::{self, HttpHandlerConfig};
    use taskforge_db::queries::tasks::{insert_task, NewTask};
    use taskforge_test_utils::{create_test_db, drop_test_db};

    use super::*;

    fn test_state(pool: PgPool) -> AppState {
        let http = HttpHandlerConfig::new("http://127.0.0.1:1", "http://127.0.0.1:1");
        let registry = std::sync::Arc::new(handler::default_registry(http));
        let executor = Executor::new(pool.clone(), registry, AlertSink::new(AlertConfig::default()));
        AppState {
            pool,
            executor,
            engine_config: EngineConfig::default(),
        }
    }

    async fn send(pool: PgPool, method: &str, uri: &str, body: serde_json::Value) -> axum::response::Response {
        let app = super::build_router(test_state(pool));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample_new_task() -> NewTask {
        NewTask {
            task_type: TaskType::OrderCancel,
            priority: Priority::Normal,
            reference_id: "ORD-1".to_string(),
            secondary_reference_id: None,
            description: None,
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
            scheduled_time: None,
            expires_at: None,
            cron_expression: None,
            max_retries: None,
            retry_delay_hours: None,
            duplicate_policy: None,
        }
    }

    #[tokio::test]
    async fn create_task_returns_201_with_pending_status() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(
            pool.clone(),
            "POST",
            "/api/tasks",
            serde_json::json!({
                "task_type": "ORDER_CANCEL",
                "reference_id": "ORD-123",
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["reference_id"], "ORD-123");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_task_rejects_blank_reference_id() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(
            pool.clone(),
            "POST",
            "/api/tasks",
            serde_json::json!({ "task_type": "ORDER_CANCEL", "reference_id": "" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_task_not_found_is_404() {
        let (pool, db_name) = create_test_db().await;

        let id = Uuid::new_v4();
        let resp = send(pool.clone(), "GET", &format!("/api/tasks/{id}"), serde_json::json!({})).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn cancel_pending_task_succeeds() {
        let (pool, db_name) = create_test_db().await;
        let task = insert_task(&pool, sample_new_task()).await.unwrap();

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/tasks/{}/cancel", task.id),
            serde_json::json!({ "reason": "test" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let reloaded = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Cancelled);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn cancel_already_terminal_task_is_409() {
        let (pool, db_name) = create_test_db().await;
        let task = insert_task(&pool, sample_new_task()).await.unwrap();
        task_db::cancel_task(&pool, task.id, "first cancel").await.unwrap();

        let resp = send(
            pool.clone(),
            "POST",
            &format!("/api/tasks/{}/cancel", task.id),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn stats_endpoint_reflects_inserted_task() {
        let (pool, db_name) = create_test_db().await;
        insert_task(&pool, sample_new_task()).await.unwrap();

        let resp = send(pool.clone(), "GET", "/api/stats", serde_json::json!({})).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let counts = json["counts"].as_array().unwrap();
        assert!(!counts.is_empty());

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
