use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::problem::ProblemDetails;
use crate::{auth::AuthError, services::chat_service::ChatServiceError, store::StoreError};

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let details = self.details;

        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!(error = %err, "database failure");
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err
                .code()
                .unwrap_or_else(|| std::borrow::Cow::Borrowed("unknown"));
            let message = format!("database error {code}");
            return Self::internal_server_error(message)
                .with_details(json!({ "sqlstate": code, "message": db_err.message() }));
        }

        Self::internal_server_error("database unavailable")
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ChatNotFound => Self::not_found("Chat not found"),
            StoreError::ParticipantNotFound => {
                Self::not_found("You are not a participant of this chat")
            }
            StoreError::MessageNotFound => Self::not_found("Message not found"),
            StoreError::UserNotFound => Self::not_found("User not found"),
            StoreError::EmailExists => Self::conflict("email_exists", "Email already exists"),
            StoreError::UsernameExists => {
                Self::conflict("username_exists", "Username already exists")
            }
            StoreError::Validation(message) => Self::bad_request(message),
            StoreError::Database(db_err) => Self::from(db_err),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            AuthError::InvalidToken => Self::unauthorized("Invalid or expired token"),
            AuthError::PasswordHash(message) | AuthError::Misconfigured(message) => {
                error!(error = %message, "auth collaborator failure");
                Self::internal_server_error("Authentication is unavailable")
            }
        }
    }
}

impl From<ChatServiceError> for ApiError {
    fn from(err: ChatServiceError) -> Self {
        match err {
            ChatServiceError::EmptyBody
            | ChatServiceError::MissingTarget
            | ChatServiceError::SelfMessage => Self::bad_request(err.to_string()),
            ChatServiceError::ChatNotFound => Self::not_found(err.to_string()),
            ChatServiceError::NotParticipant => Self::forbidden(err.to_string()),
            ChatServiceError::ParticipantLookup(ref source)
            | ChatServiceError::ChatLookup(ref source)
            | ChatServiceError::ChatCreation(ref source)
            | ChatServiceError::Persist(ref source) => {
                error!(error = %source, "message posting failed");
                Self::internal_server_error(err.to_string())
            }
        }
    }
}
