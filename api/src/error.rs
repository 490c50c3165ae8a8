use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use aitodo_core::error::{self, ApiError};
use aitodo_core::planning::PlanningValidationError;
use aitodo_core::todos::TodoValidationError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Resource not found or not owned by the caller (404)
    NotFound { resource: String },
    /// External service unreachable or answered with a non-success status (503)
    UpstreamUnavailable { message: String },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500). The message is returned to the client; keep it free of internals.
    Internal(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::UpstreamUnavailable { message } => {
                tracing::warn!("Upstream unavailable: {}", message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::UPSTREAM_UNAVAILABLE.to_string(),
                        message,
                        field: None,
                        request_id,
                        docs_hint: Some(
                            "The external service could not be reached. Retrying later may succeed."
                                .to_string(),
                        ),
                    },
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: msg,
                        field: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<TodoValidationError> for AppError {
    fn from(err: TodoValidationError) -> Self {
        AppError::validation(err.field, err.message)
    }
}

impl From<PlanningValidationError> for AppError {
    fn from(err: PlanningValidationError) -> Self {
        let field = match &err {
            PlanningValidationError::TooLong { index } => format!("tasks[{index}]"),
            _ => "tasks".to_string(),
        };
        AppError::Validation {
            message: err.to_string(),
            field: Some(field),
            docs_hint: Some(
                "Send 1-20 non-empty task descriptions of at most 200 characters each."
                    .to_string(),
            ),
        }
    }
}
