use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use aitodo_core::error::ApiError;
use aitodo_core::planning::{self, PlanSource, PlanningRequest, PlanningResponse, SYSTEM_PROMPT};
use aitodo_core::todos::{CreateTodoRequest, Todo, TodoSummary, UpdateTodoRequest};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::inference::InferenceClient;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/todos", get(list_todos).post(create_todo))
        .route(
            "/api/todos/{todo_id}",
            get(get_todo)
                .put(replace_todo)
                .patch(update_todo)
                .delete(delete_todo),
        )
}

pub fn plan_router() -> Router<AppState> {
    Router::new().route("/api/todos/plan", post(plan))
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct TodoRow {
    id: Uuid,
    title: String,
    description: String,
    priority: String,
    status: String,
    due_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TodoRow {
    fn into_todo(self) -> Result<Todo, AppError> {
        Ok(Todo {
            id: self.id,
            title: self.title,
            description: self.description,
            priority: self.priority.parse().map_err(|e| corrupt_row(self.id, e))?,
            status: self.status.parse().map_err(|e| corrupt_row(self.id, e))?,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn corrupt_row(todo_id: Uuid, err: impl std::fmt::Display) -> AppError {
    tracing::error!(todo_id = %todo_id, error = %err, "unreadable todo row");
    AppError::Internal("Stored to-do item could not be read".to_string())
}

const TODO_COLUMNS: &str =
    "id, title, description, priority, status, due_date, created_at, updated_at";

// ──────────────────────────────────────────────
// Owner-scoped data access. Every statement filters on user_id.
// ──────────────────────────────────────────────

async fn list_for_owner(pool: &sqlx::PgPool, user_id: Uuid) -> Result<Vec<Todo>, AppError> {
    let rows = sqlx::query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todos WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TodoRow::into_todo).collect()
}

async fn fetch_for_owner(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    todo_id: Uuid,
) -> Result<Todo, AppError> {
    sqlx::query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todos WHERE id = $1 AND user_id = $2"
    ))
    .bind(todo_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found(todo_id))?
    .into_todo()
}

async fn insert_for_owner(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    req: CreateTodoRequest,
) -> Result<Todo, AppError> {
    sqlx::query_as::<_, TodoRow>(&format!(
        "INSERT INTO todos (id, user_id, title, description, priority, status, due_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {TODO_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.priority.as_str())
    .bind(req.status.as_str())
    .bind(req.due_date)
    .fetch_one(pool)
    .await?
    .into_todo()
}

async fn update_for_owner(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    todo_id: Uuid,
    req: UpdateTodoRequest,
) -> Result<Todo, AppError> {
    sqlx::query_as::<_, TodoRow>(&format!(
        "UPDATE todos SET \
             title = COALESCE($3, title), \
             description = COALESCE($4, description), \
             priority = COALESCE($5, priority), \
             status = COALESCE($6, status), \
             due_date = CASE WHEN $7 THEN $8 ELSE due_date END, \
             updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 \
         RETURNING {TODO_COLUMNS}"
    ))
    .bind(todo_id)
    .bind(user_id)
    .bind(req.title.as_deref())
    .bind(req.description.as_deref())
    .bind(req.priority.map(|p| p.as_str()))
    .bind(req.status.map(|s| s.as_str()))
    .bind(req.due_date.is_some())
    .bind(req.due_date.flatten())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found(todo_id))?
    .into_todo()
}

async fn delete_for_owner(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    todo_id: Uuid,
) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM todos WHERE id = $1 AND user_id = $2")
        .bind(todo_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(todo_id));
    }
    Ok(())
}

fn not_found(todo_id: Uuid) -> AppError {
    AppError::NotFound {
        resource: format!("Todo {todo_id}"),
    }
}

// ──────────────────────────────────────────────
// Handlers
// ──────────────────────────────────────────────

/// List the caller's to-do items, newest first
#[utoipa::path(
    get,
    path = "/api/todos",
    responses(
        (status = 200, description = "Abbreviated to-do items", body = Vec<TodoSummary>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn list_todos(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<TodoSummary>>, AppError> {
    let todos = list_for_owner(&state.db, auth.user_id).await?;
    Ok(Json(todos.into_iter().map(TodoSummary::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/todos",
    request_body = CreateTodoRequest,
    responses(
        (status = 201, description = "To-do created", body = Todo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn create_todo(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppJson(req): AppJson<CreateTodoRequest>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.validate()?;
    let todo = insert_for_owner(&state.db, auth.user_id, req).await?;

    tracing::info!(user_id = %auth.user_id, todo_id = %todo.id, "todo created");
    Ok((StatusCode::CREATED, Json(todo)))
}

#[utoipa::path(
    get,
    path = "/api/todos/{todo_id}",
    params(("todo_id" = Uuid, Path, description = "To-do id")),
    responses(
        (status = 200, description = "To-do item", body = Todo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn get_todo(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(todo_id): Path<Uuid>,
) -> Result<Json<Todo>, AppError> {
    Ok(Json(fetch_for_owner(&state.db, auth.user_id, todo_id).await?))
}

/// Replace a to-do item. `title` is required; omitted fields keep their value.
#[utoipa::path(
    put,
    path = "/api/todos/{todo_id}",
    params(("todo_id" = Uuid, Path, description = "To-do id")),
    request_body = UpdateTodoRequest,
    responses(
        (status = 200, description = "Updated to-do item", body = Todo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn replace_todo(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(todo_id): Path<Uuid>,
    AppJson(req): AppJson<UpdateTodoRequest>,
) -> Result<Json<Todo>, AppError> {
    let req = req.require_title()?;
    Ok(Json(
        update_for_owner(&state.db, auth.user_id, todo_id, req).await?,
    ))
}

#[utoipa::path(
    patch,
    path = "/api/todos/{todo_id}",
    params(("todo_id" = Uuid, Path, description = "To-do id")),
    request_body = UpdateTodoRequest,
    responses(
        (status = 200, description = "Updated to-do item", body = Todo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn update_todo(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(todo_id): Path<Uuid>,
    AppJson(req): AppJson<UpdateTodoRequest>,
) -> Result<Json<Todo>, AppError> {
    let req = req.validate()?;
    Ok(Json(
        update_for_owner(&state.db, auth.user_id, todo_id, req).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/todos/{todo_id}",
    params(("todo_id" = Uuid, Path, description = "To-do id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn delete_todo(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(todo_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    delete_for_owner(&state.db, auth.user_id, todo_id).await?;
    tracing::info!(user_id = %auth.user_id, todo_id = %todo_id, "todo deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ──────────────────────────────────────────────
// POST /api/todos/plan
// ──────────────────────────────────────────────

/// Ask the model for a prioritized plan of free-text tasks
///
/// An unreachable model or a non-200 reply is a 503. A reply that arrives
/// but cannot be parsed yields a deterministic plan built locally.
#[utoipa::path(
    post,
    path = "/api/todos/plan",
    request_body = PlanningRequest,
    responses(
        (status = 200, description = "Prioritized plan", body = PlanningResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 500, description = "Assembled plan failed validation", body = ApiError),
        (status = 503, description = "AI service unreachable or returned an error", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "todos"
)]
pub async fn plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppJson(req): AppJson<PlanningRequest>,
) -> Result<Json<PlanningResponse>, AppError> {
    tracing::info!(user_id = %auth.user_id, "planning requested");
    Ok(Json(run_planning(&state.inference, &req.tasks).await?))
}

pub async fn run_planning(
    inference: &InferenceClient,
    raw_tasks: &[String],
) -> Result<PlanningResponse, AppError> {
    let tasks = planning::accept_tasks(raw_tasks)?;

    let content = inference
        .complete(SYSTEM_PROMPT, &planning::build_user_prompt(&tasks))
        .await?;

    let (plan, source) = planning::normalize_reply(&content, &tasks);
    tracing::info!(
        task_count = tasks.len(),
        fallback = source == PlanSource::Fallback,
        "plan assembled"
    );

    plan.check_shape().map_err(|e| {
        tracing::error!(error = %e, "assembled plan failed validation");
        AppError::Internal("Invalid response format from AI service".to_string())
    })?;

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    use aitodo_core::planning::PlanningResponse;
    use aitodo_core::todos::{CreateTodoRequest, Priority, UpdateTodoRequest};
    use aitodo_core::users::GoogleProfile;

    use super::*;
    use crate::config::InferenceConfig;
    use crate::routes::auth::upsert_google_user;

    /// Fake inference endpoint answering every call with `status` and `body`.
    async fn spawn_upstream(status: StatusCode, body: String) -> (SocketAddr, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let body = body.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, [("content-type", "application/json")], body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake upstream");
        });
        (addr, calls)
    }

    fn client_for(url: String) -> InferenceClient {
        InferenceClient::new(
            reqwest::Client::new(),
            InferenceConfig {
                url,
                token: Some("test-token".to_string()),
                model: "test-model".to_string(),
                temperature: 0.7,
                top_p: 0.9,
                max_tokens: 256,
                timeout: Duration::from_secs(2),
            },
        )
    }

    fn completion(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    fn tasks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn model_plan_is_returned_when_well_formed() {
        let reply = r#"{"plan": "Report first.", "prioritized_tasks": [
            {"task": "write report", "priority": "high", "estimated_time": "2 hours", "order": 1},
            {"task": "call bank", "priority": "low", "estimated_time": "15 minutes", "order": 2}]}"#;
        let (addr, _) = spawn_upstream(StatusCode::OK, completion(reply)).await;

        let plan = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&[" write report ", "call bank"]),
        )
        .await
        .expect("plan should succeed");

        assert_eq!(plan.plan, "Report first.");
        assert_eq!(plan.prioritized_tasks[0].estimated_time, "2 hours");
    }

    #[tokio::test]
    async fn prose_reply_falls_back_to_synthesized_plan() {
        let (addr, _) = spawn_upstream(StatusCode::OK, completion("Just do them in order.")).await;

        let plan = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&["a", "", "b", "c"]),
        )
        .await
        .expect("fallback plan should succeed");

        assert_eq!(plan.plan, "Just do them in order.");
        assert_eq!(plan.prioritized_tasks.len(), 3);
        assert_eq!(plan.prioritized_tasks[0].priority, Priority::High);
        assert_eq!(plan.prioritized_tasks[1].priority, Priority::Medium);
        assert_eq!(plan.prioritized_tasks[2].priority, Priority::Low);
        assert_eq!(plan.prioritized_tasks[2].estimated_time, "60 minutes");
    }

    #[tokio::test]
    async fn reply_without_choices_falls_back_with_empty_plan() {
        let (addr, _) = spawn_upstream(StatusCode::OK, json!({"choices": []}).to_string()).await;

        let plan = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&["a"]),
        )
        .await
        .expect("fallback plan should succeed");

        assert_eq!(plan.plan, "");
        assert_eq!(plan.prioritized_tasks.len(), 1);
    }

    #[tokio::test]
    async fn upstream_error_status_is_unavailable_without_fallback() {
        let upstream_body = "{\n  \"error\": \"model exploded\"\n}";
        let (addr, _) =
            spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, upstream_body.to_string()).await;

        let err = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&["a", "b"]),
        )
        .await
        .expect_err("upstream 500 must not be papered over");

        match err {
            AppError::UpstreamUnavailable { message } => {
                assert_eq!(
                    message,
                    format!("AI service returned status 500: {upstream_body}")
                );
            }
            other => panic!("unexpected error variant: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&["a"]),
        )
        .await
        .expect_err("nobody is listening");
        assert!(matches!(err, AppError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_upstream() {
        let (addr, calls) = spawn_upstream(StatusCode::OK, completion("unused")).await;
        let client = client_for(format!("http://{addr}/chat/completions"));

        let blank = run_planning(&client, &tasks(&["", "   "])).await;
        assert!(matches!(blank, Err(AppError::Validation { .. })));

        let too_many: Vec<String> = (0..21).map(|i| format!("task {i}")).collect();
        let over = run_planning(&client, &too_many).await;
        assert!(matches!(over, Err(AppError::Validation { .. })));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_plan_with_zero_order_falls_back() {
        let reply = r#"{"plan": "p", "prioritized_tasks": [
            {"task": "a", "priority": "high", "estimated_time": "1 hour", "order": 0}]}"#;
        let (addr, _) = spawn_upstream(StatusCode::OK, completion(reply)).await;

        let plan = run_planning(
            &client_for(format!("http://{addr}/chat/completions")),
            &tasks(&["a"]),
        )
        .await
        .expect("unusable model entries still yield a plan");

        assert_eq!(plan.plan, reply);
        assert_eq!(plan.prioritized_tasks.len(), 1);
        assert_eq!(plan.prioritized_tasks[0].order, 1);
        assert_eq!(plan.prioritized_tasks[0].estimated_time, "30 minutes");
    }

    #[tokio::test]
    async fn plan_route_requires_authentication() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/aitodo_unused")
            .expect("lazy pool");
        let config = crate::config::AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/aitodo_unused".to_string()),
            "JWT_SECRET_KEY" => Some("test-secret".to_string()),
            _ => None,
        })
        .expect("config");
        let app = plan_router().with_state(AppState::new(pool, &config));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/todos/plan")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tasks": ["a"]}"#))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn planning_response_serializes_with_expected_keys() {
        let plan = aitodo_core::planning::fallback_plan("text", &tasks(&["a"]));
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(
            value,
            json!({
                "plan": "text",
                "prioritized_tasks": [
                    {"task": "a", "priority": "low", "estimated_time": "30 minutes", "order": 1}
                ]
            })
        );
        let _: PlanningResponse = serde_json::from_value(value).unwrap();
    }

    // ── Database-backed tests (skipped without DATABASE_URL) ──

    async fn db_pool_if_available() -> Option<sqlx::PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .ok()?;

        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .expect("migrations should run");
        Some(pool)
    }

    async fn make_user(pool: &sqlx::PgPool) -> Uuid {
        let profile = GoogleProfile::new(
            format!("google-{}", Uuid::now_v7()),
            format!("{}@example.com", Uuid::now_v7()),
            "Test User",
            "",
        );
        upsert_google_user(pool, &profile).await.expect("create user").id
    }

    fn create_request(title: &str) -> CreateTodoRequest {
        serde_json::from_value::<CreateTodoRequest>(json!({"title": title}))
            .unwrap()
            .validate()
            .unwrap()
    }

    #[tokio::test]
    async fn todos_are_invisible_across_owners() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let alice = make_user(&pool).await;
        let bob = make_user(&pool).await;

        let todo = insert_for_owner(&pool, alice, create_request("alice's secret"))
            .await
            .expect("insert");

        assert!(list_for_owner(&pool, bob).await.unwrap().is_empty());
        assert!(matches!(
            fetch_for_owner(&pool, bob, todo.id).await,
            Err(AppError::NotFound { .. })
        ));

        let patch = UpdateTodoRequest {
            title: Some("hijacked".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update_for_owner(&pool, bob, todo.id, patch).await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            delete_for_owner(&pool, bob, todo.id).await,
            Err(AppError::NotFound { .. })
        ));

        let still_there = fetch_for_owner(&pool, alice, todo.id).await.expect("owner can read");
        assert_eq!(still_there.title, "alice's secret");
        assert_eq!(list_for_owner(&pool, alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_update_keeps_unspecified_fields() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let owner = make_user(&pool).await;

        let created = insert_for_owner(
            &pool,
            owner,
            serde_json::from_value::<CreateTodoRequest>(json!({
                "title": "file taxes",
                "description": "before April",
                "priority": "high",
                "due_date": "2027-04-15T00:00:00Z"
            }))
            .unwrap()
            .validate()
            .unwrap(),
        )
        .await
        .expect("insert");

        let patch: UpdateTodoRequest =
            serde_json::from_value(json!({"status": "in_progress"})).unwrap();
        let updated = update_for_owner(&pool, owner, created.id, patch.validate().unwrap())
            .await
            .expect("patch");
        assert_eq!(updated.title, "file taxes");
        assert_eq!(updated.description, "before April");
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.due_date, created.due_date);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);

        let clear: UpdateTodoRequest = serde_json::from_value(json!({"due_date": null})).unwrap();
        let cleared = update_for_owner(&pool, owner, created.id, clear.validate().unwrap())
            .await
            .expect("clear due date");
        assert!(cleared.due_date.is_none());

        delete_for_owner(&pool, owner, created.id).await.expect("delete");
        assert!(matches!(
            fetch_for_owner(&pool, owner, created.id).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
