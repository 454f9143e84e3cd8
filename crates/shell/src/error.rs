//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`; server-side failures are
//! captured to Sentry before the response is written.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use site_shell_core::DescriptorError;
use thiserror::Error;

use crate::cache::{CacheError, ManifestError};

/// Application-level error type for the shell.
#[derive(Debug, Error)]
pub enum AppError {
    /// Offline cache operation failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Submitted product is incomplete.
    #[error("Invalid product: {0}")]
    Product(#[from] DescriptorError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A background task failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ManifestError> for AppError {
    fn from(err: ManifestError) -> Self {
        Self::Cache(CacheError::Manifest(err))
    }
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Cache(err) => match err {
                CacheError::InvalidState { .. } => StatusCode::CONFLICT,
                CacheError::Manifest(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CacheError::PrecacheFetch { .. } | CacheError::PrecacheStatus { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                CacheError::StoreNotFound(_) => StatusCode::NOT_FOUND,
                CacheError::EntryTooLarge { .. } | CacheError::StoreDeleted(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Product(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Internal(_)
            | Self::Cache(CacheError::EntryTooLarge { .. } | CacheError::StoreDeleted(_)) => {
                "Internal server error".to_string()
            }
            Self::Cache(CacheError::PrecacheFetch { .. } | CacheError::PrecacheStatus { .. }) => {
                "Upstream unavailable".to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode as Code;

    use super::*;
    use crate::cache::LifecycleState;

    fn status_of(err: AppError) -> Code {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::BadRequest("missing id".to_string());
        assert_eq!(err.to_string(), "Bad request: missing id");

        let err = AppError::Product(DescriptorError::MissingName);
        assert!(err.to_string().starts_with("Invalid product"));
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(status_of(AppError::BadRequest("x".into())), Code::BAD_REQUEST);
        assert_eq!(
            status_of(AppError::Product(DescriptorError::MissingId)),
            Code::BAD_REQUEST
        );
        assert_eq!(
            status_of(AppError::Cache(CacheError::StoreNotFound("x".into()))),
            Code::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Cache(CacheError::InvalidState {
                action: "activate",
                state: LifecycleState::Parsed,
            })),
            Code::CONFLICT
        );
        assert_eq!(
            status_of(AppError::from(ManifestError::Empty)),
            Code::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        for err in [
            AppError::Cache(CacheError::StoreDeleted("site-cache-v1".into())),
            AppError::Internal("cart update task failed: panicked".into()),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), Code::INTERNAL_SERVER_ERROR);
            let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
            assert_eq!(body, "Internal server error");
        }
    }
}
