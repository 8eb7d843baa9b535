use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use telemon_common::types::MetricError;
use telemon_storage::error::StorageError;

/// Failures surfaced by the controller to the HTTP and gRPC front ends.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed JSON, path parameter or numeric string.
    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Metric(#[from] MetricError),

    /// A path route was called without a metric key.
    #[error("metric key is missing")]
    MissingKey,

    /// Applying a delta would overflow the stored counter.
    #[error("counter '{0}' overflows")]
    Overflow(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn parse(e: impl std::fmt::Display) -> Self {
        ServiceError::Parse(e.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingKey => StatusCode::NOT_FOUND,
            ServiceError::Parse(_) | ServiceError::Metric(_) | ServiceError::Overflow(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Storage(StorageError::WrongKind { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
