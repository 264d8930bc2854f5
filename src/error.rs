use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::model::ModelError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Application error taxonomy surfaced by the HTTP layer.
///
/// Synchronous request paths map these to status codes; the asynchronous
/// analysis path never surfaces them to a client and instead records the
/// message on the submission itself.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("submission not found")]
    NotFound,

    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),

    #[error("model backend unavailable: {0}")]
    ModelUnavailable(String),

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::StorageUnavailable(_)
            | AppError::ModelUnavailable(_)
            | AppError::DatabaseUnavailable(_)
            | AppError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound,
            other => AppError::DatabaseUnavailable(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            // A bad declared content type is the client's fault, not the bucket's.
            StorageError::InvalidContentType(_) => AppError::InvalidInput(e.to_string()),
            other => AppError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<ModelError> for AppError {
    fn from(e: ModelError) -> Self {
        AppError::ModelUnavailable(e.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::QueueUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::ModelUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn bad_content_type_surfaces_as_client_error() {
        let err: AppError = StorageError::InvalidContentType("bogus".into()).into();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err: AppError = StorageError::Config("no creds".into()).into();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound));
    }
}
