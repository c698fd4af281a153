//! Error types for treesync-server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sync_core::LoginRejection;
use sync_store::StorageError;
use sync_types::{EntityKind, ErrorBody, ErrorCode, SyncError};

/// Why a peer API request was refused.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Login refused.
    #[error("{0}")]
    Login(#[from] LoginRejection),

    /// Missing, unknown or expired session token.
    #[error("missing or expired session, log in again")]
    Unauthorized,

    /// No such entity.
    #[error("{kind} {entity_id} not found")]
    NotFound {
        /// Requested kind.
        kind: EntityKind,
        /// Requested id.
        entity_id: String,
    },

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Payload could not be decoded.
    #[error("invalid payload: {0}")]
    Payload(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Machine-readable reason sent to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Login(LoginRejection::VersionMismatch { .. }) => ErrorCode::VersionMismatch,
            ApiError::Login(LoginRejection::ClockSkew { .. }) => ErrorCode::ClockSkew,
            ApiError::Login(LoginRejection::BadSignature) => ErrorCode::BadCredentials,
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::NotFound { .. } | ApiError::Storage(StorageError::NotFound { .. }) => {
                ErrorCode::NotFound
            }
            ApiError::BadRequest(_)
            | ApiError::Payload(_)
            | ApiError::Storage(StorageError::Payload(_))
            | ApiError::Storage(StorageError::NotDeletable { .. }) => ErrorCode::BadRequest,
            ApiError::Storage(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status for [`ApiError::code`].
    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::VersionMismatch | ErrorCode::ClockSkew | ErrorCode::BadRequest => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::BadCredentials | ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request refused: {}", self);
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
