//! Error types for sync-store.

use std::path::PathBuf;
use sync_types::{EntityKind, SyncError};

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored or incoming payload could not be decoded.
    #[error("payload error: {0}")]
    Payload(#[from] SyncError),

    /// Entity not found.
    #[error("{kind} not found: {entity_id}")]
    NotFound {
        /// Kind looked up.
        kind: EntityKind,
        /// Id looked up.
        entity_id: String,
    },

    /// The kind has no soft delete.
    #[error("{kind} rows cannot be soft-deleted")]
    NotDeletable {
        /// The kind.
        kind: EntityKind,
    },

    /// No handler registered for the kind.
    #[error("no handler registered for {kind}")]
    NoHandler {
        /// The kind.
        kind: EntityKind,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
