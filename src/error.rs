use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::models::attempt::AttemptStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not authorized to take this assessment")]
    NotAuthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Assessment opens at {opens_at}")]
    NotYetOpen { opens_at: DateTime<Utc> },

    #[error("Assessment closed at {closed_at}")]
    WindowClosed { closed_at: DateTime<Utc> },

    #[error("All {max_attempts} attempts have been used")]
    AttemptsExhausted { max_attempts: i32 },

    #[error("Next attempt available at {available_at}")]
    AttemptCooldown { available_at: DateTime<Utc> },

    #[error("Attempt time has expired")]
    AttemptExpired,

    #[error("Attempt is not active (status: {0})")]
    NotActive(AttemptStatus),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Time limit exceeded for question {question_id}")]
    QuestionTimeLimit { question_id: Uuid },

    #[error("Results are not available yet")]
    NotAvailableYet,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    fn code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) => "bad_request",
            Error::NotAuthorized => "not_authorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::NotYetOpen { .. } => "not_yet_open",
            Error::WindowClosed { .. } => "window_closed",
            Error::AttemptsExhausted { .. } => "attempts_exhausted",
            Error::AttemptCooldown { .. } => "attempt_cooldown",
            Error::AttemptExpired => "attempt_expired",
            Error::NotActive(_) => "not_active",
            Error::InvalidState(_) => "invalid_state",
            Error::QuestionTimeLimit { .. } => "question_time_limit",
            Error::NotAvailableYet => "not_available_yet",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let (status, message) = match &self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::NotAuthorized => (StatusCode::FORBIDDEN, self.to_string()),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::NotYetOpen { .. }
            | Error::WindowClosed { .. }
            | Error::AttemptsExhausted { .. }
            | Error::AttemptCooldown { .. } => (StatusCode::FORBIDDEN, self.to_string()),
            Error::AttemptExpired => (StatusCode::GONE, self.to_string()),
            Error::NotActive(_) | Error::InvalidState(_) | Error::QuestionTimeLimit { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }
            Error::NotAvailableYet => (StatusCode::FORBIDDEN, self.to_string()),
            Error::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let mut body = json!({ "error": code, "message": message });
        match &self {
            Error::NotYetOpen { opens_at } => body["opens_at"] = json!(opens_at),
            Error::WindowClosed { closed_at } => body["closed_at"] = json!(closed_at),
            Error::AttemptsExhausted { max_attempts } => {
                body["max_attempts"] = json!(max_attempts)
            }
            Error::AttemptCooldown { available_at } => {
                body["available_at"] = json!(available_at)
            }
            Error::NotActive(status) => body["status"] = json!(status),
            Error::QuestionTimeLimit { question_id } => body["question_id"] = json!(question_id),
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
