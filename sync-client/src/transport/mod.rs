//! Transport abstraction for treesync.
//!
//! A [`Transport`] is an authenticated request/response channel to one
//! peer replica:
//! - `login()` proves knowledge of the document secret and opens a session
//! - `pull_changes()` reads the peer's changed feed after a cursor
//! - `fetch_entity()` reads the current value of one entity
//! - `push_entity()` hands the peer one entity (or its erasure)
//! - `check()` reads the peer's content hashes
//!
//! Every failure is normalized into a [`FailureReason`] so the engine can
//! report it without inspecting library-specific errors.
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::new(&config)?;
//! let login = transport.login(&request).await?;
//! let changes = transport.pull_changes(ChangeId::zero(), 1000).await?;
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use serde_json::Value;
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, ErrorCode, LoginRequest, LoginResponse,
    PushRequest,
};
use thiserror::Error;

/// Why a request to the peer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The peer could not be reached.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// TLS handshake or certificate failure.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The peer answered with a non-2xx status.
    #[error("peer answered {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Machine-readable reason, when the peer sent one.
        code: Option<ErrorCode>,
        /// Peer's message.
        message: String,
    },

    /// The answer could not be decoded.
    #[error("malformed answer: {0}")]
    Decode(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{request} failed: {reason}")]
pub struct TransportError {
    /// What was being requested, e.g. `GET /sync/changed`.
    pub request: String,
    /// Normalized cause.
    pub reason: FailureReason,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(request: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            request: request.into(),
            reason,
        }
    }

    /// The peer's machine-readable rejection code, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match &self.reason {
            FailureReason::Status { code, .. } => *code,
            _ => None,
        }
    }
}

/// Request/response exchange with one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Log in and open a session.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError>;

    /// Peer changes with id greater than `since`, ascending, at most `limit`.
    async fn pull_changes(
        &self,
        since: ChangeId,
        limit: u32,
    ) -> Result<Vec<ChangedEntry>, TransportError>;

    /// Current value of one peer entity, `None` if it is gone.
    async fn fetch_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<Value>, TransportError>;

    /// Hand one entity to the peer.
    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
    ) -> Result<(), TransportError>;

    /// The peer's content hashes and highest synced change id.
    async fn check(&self) -> Result<CheckResponse, TransportError>;

    /// Flip between proxied and direct connections.
    ///
    /// Called after a failed run. Transports without a proxy ignore it.
    fn toggle_proxy(&self) {}
}
