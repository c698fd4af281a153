//! Sync run failures.

use sync_store::StorageError;
use sync_types::{OriginId, SyncError};
use thiserror::Error;

use crate::transport::TransportError;

/// The peer and this replica cannot sync at all until someone fixes the
/// setup. Fatal for the current run only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolMismatch {
    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),

    /// Clocks differ by more than the login window; fix the system time.
    #[error("clock skew too large: {0}")]
    ClockSkew(String),

    /// The configured peer is this replica.
    #[error("peer {0} is this replica; check the configured peer URL")]
    SelfLoop(OriginId),

    /// The peer does not share our document secret.
    #[error("peer rejected the document secret")]
    BadCredentials,
}

/// Why a sync run stopped.
#[derive(Debug, Error)]
pub enum SyncFailure {
    /// A request to the peer failed. Retried on the next tick.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Setup problem surfaced at login.
    #[error("{0}")]
    ProtocolMismatch(#[from] ProtocolMismatch),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A payload could not be decoded.
    #[error("payload error: {0}")]
    Payload(#[from] SyncError),
}
