//! Error types for treesync data and wire types.

use thiserror::Error;

/// Errors that can occur while decoding or validating sync data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization or deserialization failed
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Entity kind name not recognised
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
