use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use aitodo_core::auth::{TokenError, TokenIssuer, TokenType};

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
///
/// Two-phase resolution:
/// 1. `InjectAuthLayer` validates the token and stores the user in request extensions.
/// 2. The extractor reads it from extensions, or re-runs authentication to report why it failed.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

// --- Tower Layer/Service for auth injection ---

/// Tower Layer that injects `AuthenticatedUser` into request extensions.
/// Silently continues on auth failure (unauthenticated endpoints like health, auth).
#[derive(Clone)]
pub struct InjectAuthLayer {
    tokens: Arc<TokenIssuer>,
    pool: sqlx::PgPool,
}

impl InjectAuthLayer {
    pub fn new(tokens: Arc<TokenIssuer>, pool: sqlx::PgPool) -> Self {
        Self { tokens, pool }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            tokens: self.tokens.clone(),
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    tokens: Arc<TokenIssuer>,
    pool: sqlx::PgPool,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let tokens = self.tokens.clone();
        let pool = self.pool.clone();

        // Extract token synchronously (headers are Send-safe, Body is not)
        let token = extract_bearer_token(&req);

        Box::pin(async move {
            if let Some(token) = token {
                if let Ok(auth_user) = authenticate_access_token(&token, &tokens, &pool).await {
                    req.extensions_mut().insert(auth_user);
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

/// Extract bearer token from Authorization header (synchronous, no body access).
fn extract_bearer_token(req: &Request) -> Option<String> {
    let auth_header = req.headers().get("authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(|s| s.to_owned())
}

// --- Extractor (used by handlers) ---

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Fast path: auth middleware already validated the token
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        // Slow path: no middleware ran, or it rejected the token. Re-run to get the reason.
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authentication credentials were not provided".to_string(),
                docs_hint: Some(
                    "Include 'Authorization: Bearer <access_token>'. \
                     Obtain tokens via POST /api/auth/google."
                        .to_string(),
                ),
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must use Bearer scheme".to_string(),
                docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
            })?;

        authenticate_access_token(token, &state.tokens, &state.db).await
    }
}

async fn authenticate_access_token(
    token: &str,
    tokens: &TokenIssuer,
    pool: &sqlx::PgPool,
) -> Result<AuthenticatedUser, AppError> {
    let claims = tokens
        .verify(token, TokenType::Access)
        .map_err(token_error_to_app_error)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(claims.sub)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

    if !exists {
        return Err(AppError::Unauthorized {
            message: "User not found".to_string(),
            docs_hint: Some("Sign in again via POST /api/auth/google.".to_string()),
        });
    }

    Ok(AuthenticatedUser {
        user_id: claims.sub,
    })
}

pub fn token_error_to_app_error(err: TokenError) -> AppError {
    match err {
        TokenError::Expired => AppError::Unauthorized {
            message: "Token has expired".to_string(),
            docs_hint: Some(
                "Use your refresh token to obtain a new access token via POST /api/token/refresh."
                    .to_string(),
            ),
        },
        TokenError::WrongType { expected } => AppError::Unauthorized {
            message: format!("Wrong token type, expected {expected} token"),
            docs_hint: None,
        },
        TokenError::Invalid(_) => AppError::Unauthorized {
            message: "Token is invalid".to_string(),
            docs_hint: None,
        },
        TokenError::Signing(msg) => {
            tracing::error!(error = %msg, "token signing failed");
            AppError::Internal("Failed to issue token".to_string())
        }
    }
}
