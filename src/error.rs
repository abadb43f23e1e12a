use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::control::Rejection;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Command rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Store(e) => {
                tracing::error!("State store error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": format!("State store error: {e}") }),
                )
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Invalid username or password" }),
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            Self::Rejected(rejection) => {
                let status = match rejection {
                    Rejection::InvalidSchedule(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    Rejection::ModeConflict | Rejection::Unauthorized => StatusCode::FORBIDDEN,
                };
                (
                    status,
                    json!({ "error": rejection.to_string(), "reason": rejection.code() }),
                )
            }
            Self::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
