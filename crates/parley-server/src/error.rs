//! Application error types and Axum response conversion.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::ChatError;
use serde::Serialize;
use tracing::error;

/// Application-level errors with HTTP status code mapping.
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated => AppError::Unauthorized(err.to_string()),
            ChatError::Forbidden => AppError::Forbidden(err.to_string()),
            ChatError::ChatNotFound(_) => AppError::NotFound("Chat not found".into()),
            ChatError::NotFound(_) => AppError::NotFound(err.to_string()),
            ChatError::InvalidInput(_) | ChatError::UnsupportedProvider(_) | ChatError::EmptyConversation => {
                AppError::BadRequest(err.to_string())
            }
            other => {
                error!("Request failed: {}", other);
                AppError::Internal("internal server error".into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("Storage failure: {:#}", err);
        AppError::Internal("internal server error".into())
    }
}
