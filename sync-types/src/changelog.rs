//! The durable "entity X changed" record.

use serde::{Deserialize, Serialize};

use crate::{ChangeId, EntityKind, OriginId, Timestamp};

/// One current changelog row per `(entity_kind, entity_id)`.
///
/// Re-recording a change replaces the row and assigns a fresh, higher `id`,
/// so the log always reads as "latest change per entity, in change order".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// Position in the local changelog.
    pub id: ChangeId,
    /// Kind of the changed entity.
    pub entity_kind: EntityKind,
    /// Id of the changed entity.
    pub entity_id: String,
    /// Content hash of the entity after the change (`"erased"` once erased).
    pub hash: String,
    /// The entity was hard-erased.
    pub is_erased: bool,
    /// When the change was recorded.
    pub utc_date_changed: Timestamp,
    /// Whether the change replicates.
    pub is_synced: bool,
    /// Process that originally produced the change.
    pub source_id: OriginId,
}

impl ChangeLogEntry {
    /// Hash recorded for erased entities.
    pub const ERASED_HASH: &'static str = "erased";
}
