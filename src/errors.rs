use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::domain::InvalidIdentifier;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Upsert conflict: {0}")]
    UpsertConflict(String),
    #[error("Database error: {0}")]
    Db(sqlx::Error),
}

/// Errors raised by a `SecurityRepository`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("ISIN code is required for upsert")]
    MissingIsin,
    #[error("constraint violation for {isin}: {message}")]
    Conflict { isin: String, message: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidIdentifier(_) | AppError::Validation(_) => "invalid_input",
            AppError::UpsertConflict(_) => "upsert_conflict",
            AppError::Db(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidIdentifier(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UpsertConflict(_) => StatusCode::CONFLICT,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // never leak driver messages to callers
        let message = match &self {
            AppError::Db(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<InvalidIdentifier> for AppError {
    fn from(value: InvalidIdentifier) -> Self {
        AppError::InvalidIdentifier(value.0)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::MissingIsin => AppError::Validation(value.to_string()),
            RepositoryError::Conflict { .. } => AppError::UpsertConflict(value.to_string()),
            RepositoryError::Database(e) => AppError::Db(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_errors_map_to_boundary_errors() {
        assert!(matches!(AppError::from(RepositoryError::MissingIsin), AppError::Validation(_)));
        let conflict = RepositoryError::Conflict {
            isin: "INE009A01021".into(),
            message: "duplicate".into(),
        };
        assert!(matches!(AppError::from(conflict), AppError::UpsertConflict(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidIdentifier("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::UpsertConflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Db(sqlx::Error::PoolTimedOut).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Db(sqlx::Error::PoolTimedOut).code(), "internal_error");
    }
}
