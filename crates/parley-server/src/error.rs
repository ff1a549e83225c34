use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use parley_shared::protocol::{ErrorCode, ServerEvent};
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The store failed for a reason other than a missing record. Never
    /// retried here; the caller decides.
    #[error("Store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServerError::NotFound(what),
            StoreError::Conflict(what) => ServerError::InvalidState(what),
            other => {
                warn!(error = %other, "Store operation failed");
                ServerError::Store(other)
            }
        }
    }
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ServerError::InvalidState(_) => ErrorCode::InvalidState,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Store(_) => ErrorCode::StoreFailure,
        }
    }

    /// The failure report pushed back to the connection that caused it.
    pub fn to_event(&self) -> ServerEvent {
        let message = match self {
            ServerError::Store(_) => "Store failure".to_string(),
            other => other.to_string(),
        };
        ServerEvent::Error {
            code: self.code(),
            message,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::PermissionDenied(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::InvalidState(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Store failure".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
