use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::DatabaseErrorKind;
use log::error;
use serde_json::json;

use crate::llm::LlmError;
use crate::security::auth_api::AuthError;

/// Error returned by every RPC and REST handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("language model error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Auth(e) => e.status_code(),
            Self::Internal(_) | Self::Database(_) | Self::Pool(_) | Self::Llm(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Auth(e) => e.error_code(),
            Self::Internal(_) | Self::Database(_) | Self::Pool(_) | Self::Llm(_) => "internal",
        }
    }

    /// Client-facing text. Server-side failures never leak their cause.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Database(_) | Self::Pool(_) | Self::Llm(_) => {
                "An internal error occurred".to_string()
            }
            Self::Auth(e) => e.message(),
            other => other.to_string(),
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound("Record not found".to_string()),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(format!("Duplicate value: {}", info.message()))
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::BadRequest(format!("Invalid reference: {}", info.message()))
            }
            other => Self::Database(other),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task error: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.client_message(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err: ApiError = diesel::result::Error::NotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err = ApiError::Internal("password=hunter2".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_forbidden_keeps_reason() {
        let err = ApiError::forbidden("Only staff can post internal notes");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.client_message(), "Only staff can post internal notes");
    }

    #[test]
    fn test_auth_errors_pass_through() {
        let err: ApiError = AuthError::ExpiredToken.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "expired_token");
    }
}
