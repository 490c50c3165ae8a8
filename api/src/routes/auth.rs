use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aitodo_core::auth::TokenType;
use aitodo_core::error::ApiError;
use aitodo_core::users::{GoogleProfile, User};

use crate::auth::token_error_to_app_error;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn google_router() -> Router<AppState> {
    Router::new().route("/api/auth/google", post(google_login))
}

pub fn refresh_router() -> Router<AppState> {
    Router::new().route("/api/token/refresh", post(refresh))
}

// ──────────────────────────────────────────────
// POST /api/auth/google
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct GoogleAuthRequest {
    /// Google OAuth access token obtained by the client
    pub token: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/google",
    request_body = GoogleAuthRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Missing token or Google rejected it", body = ApiError),
        (status = 503, description = "Google could not be reached", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn google_login(
    State(state): State<AppState>,
    AppJson(req): AppJson<GoogleAuthRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(AppError::validation("token", "token must not be empty"));
    }

    let profile = state.google.verify(token).await?;
    let user = upsert_google_user(&state.db, &profile).await?;

    let pair = state
        .tokens
        .issue_pair(user.id)
        .map_err(token_error_to_app_error)?;

    tracing::info!(user_id = %user.id, "user signed in with Google");

    Ok(Json(AuthResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

/// Create the local account on first login, refresh profile fields afterwards.
///
/// Keyed by `google_id`; the local `id` and `username` never change. Name
/// parts the provider leaves empty keep their stored value, so a one-word
/// name replaces only `first_name`.
pub async fn upsert_google_user(
    pool: &sqlx::PgPool,
    profile: &GoogleProfile,
) -> Result<User, AppError> {
    let username = if profile.email.is_empty() {
        profile.google_id.clone()
    } else {
        profile.email.clone()
    };
    let has_first_name = !profile.first_name.is_empty();
    let has_last_name = !profile.last_name.is_empty();

    let row = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (id, google_id, username, email, first_name, last_name, profile_picture)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (google_id) DO UPDATE SET
            email = EXCLUDED.email,
            first_name = CASE WHEN $8 THEN EXCLUDED.first_name ELSE users.first_name END,
            last_name = CASE WHEN $9 THEN EXCLUDED.last_name ELSE users.last_name END,
            profile_picture = EXCLUDED.profile_picture,
            updated_at = NOW()
        RETURNING id, username, email, first_name, last_name, profile_picture
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&profile.google_id)
    .bind(&username)
    .bind(&profile.email)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(&profile.profile_picture)
    .bind(has_first_name)
    .bind(has_last_name)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

// ──────────────────────────────────────────────
// POST /api/token/refresh
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RefreshResponse {
    pub access: String,
}

#[utoipa::path(
    post,
    path = "/api/token/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 400, description = "Malformed body", body = ApiError),
        (status = 401, description = "Invalid or expired refresh token", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(req): AppJson<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let claims = state
        .tokens
        .verify(&req.refresh, TokenType::Refresh)
        .map_err(token_error_to_app_error)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(claims.sub)
        .fetch_one(&state.db)
        .await?;
    if !exists {
        return Err(AppError::Unauthorized {
            message: "User not found".to_string(),
            docs_hint: Some("Sign in again via POST /api/auth/google.".to_string()),
        });
    }

    let access = state
        .tokens
        .issue(claims.sub, TokenType::Access)
        .map_err(token_error_to_app_error)?;

    Ok(Json(RefreshResponse { access }))
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    profile_picture: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            profile_picture: row.profile_picture,
        }
    }
}
