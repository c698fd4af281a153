//! JSON wire messages of the peer sync API.
//!
//! ```text
//! POST /sync/login             LoginRequest  -> LoginResponse
//! GET  /sync/changed?since=N   -> [ChangedEntry]
//! GET  /sync/<kind>/<id>       -> entity payload | 404
//! PUT  /sync/<kind>            PushRequest   -> 204
//! GET  /sync/check             -> CheckResponse
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{ChangeId, ChangeLogEntry, EntityKind, OriginId, Timestamp};

/// Protocol version both ends must agree on.
pub const PROTOCOL_VERSION: u32 = 1;

/// Header carrying the session token returned by login.
pub const SESSION_HEADER: &str = "x-sync-session";

/// Default and maximum page size of the changed feed.
pub const MAX_CHANGES_PER_PAGE: u32 = 1000;

/// Largest tolerated difference between the login timestamp and the
/// peer's clock.
pub const MAX_CLOCK_SKEW_MS: u64 = 5_000;

/// Login handshake sent by the syncing replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Caller's current time.
    pub timestamp: Timestamp,
    /// Caller's protocol version.
    pub protocol_version: u32,
    /// Base64 HMAC-SHA256 of the timestamp under the shared document secret.
    pub hash: String,
}

/// Peer's answer to a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Peer's current origin id.
    pub origin_id: OriginId,
    /// Highest id in the peer's changelog.
    pub max_change_id: ChangeId,
    /// Token to send as `x-sync-session` on every later request.
    pub session_token: String,
}

/// One entry of the peer's changed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntry {
    /// Position in the peer's changelog.
    pub id: ChangeId,
    /// Kind of the changed entity.
    pub entity_kind: EntityKind,
    /// Id of the changed entity.
    pub entity_id: String,
    /// Process that originally produced the change.
    pub source_id: OriginId,
    /// The entity was hard-erased; there is nothing to fetch.
    #[serde(default)]
    pub is_erased: bool,
}

impl From<&ChangeLogEntry> for ChangedEntry {
    fn from(entry: &ChangeLogEntry) -> Self {
        Self {
            id: entry.id,
            entity_kind: entry.entity_kind,
            entity_id: entry.entity_id.clone(),
            source_id: entry.source_id.clone(),
            is_erased: entry.is_erased,
        }
    }
}

/// Body of `PUT /sync/<kind>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Process that originally produced the change.
    pub source_id: OriginId,
    /// Id of the pushed entity.
    pub entity_id: String,
    /// Full entity payload, `None` when the entity was erased.
    pub entity: Option<Value>,
}

/// Answer of `GET /sync/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// Highest synced id in the peer's changelog.
    #[serde(rename = "maxSyncId")]
    pub max_change_id: ChangeId,
    /// Content hash per stored entity kind.
    pub hashes: BTreeMap<EntityKind, String>,
}

/// Machine-readable reason of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Login with a different protocol version.
    VersionMismatch,
    /// Login timestamp too far from the peer's clock.
    ClockSkew,
    /// Login signature does not match the document secret.
    BadCredentials,
    /// Missing, unknown or expired session token.
    Unauthorized,
    /// No such entity or route.
    NotFound,
    /// Malformed request.
    BadRequest,
    /// Peer-side failure.
    Internal,
}

/// Error body returned by the peer on non-2xx answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable reason.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}
