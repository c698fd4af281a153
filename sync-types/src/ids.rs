//! Identity and ordering types for treesync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// Identifier of one running process of one replica.
///
/// A fresh one is minted at every boot and persisted, so a replica can
/// recognise its own writes coming back to it through a peer. 9 bytes of
/// random data, displayed as 12 characters of URL-safe base64.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    /// Create a new random OriginId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 9];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an existing identifier (as persisted or received on the wire).
    pub fn from_string(value: impl Into<String>) -> Result<Self, SyncError> {
        let value = value.into();
        if value.is_empty() {
            return Err(SyncError::InvalidData("empty origin id".into()));
        }
        Ok(Self(value))
    }

    /// Borrow the identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginId({})", self.0)
    }
}

/// Position of an entry in a replica's changelog.
///
/// Assigned by the local store, strictly increasing. Sync cursors are
/// expressed in these ids, so they never depend on wall clocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ChangeId(u64);

impl ChangeId {
    /// Create a new ChangeId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this ChangeId.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id before any entry ("nothing synced yet").
    pub fn zero() -> Self {
        Self(0)
    }

    /// Increment by one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeId({})", self.0)
    }
}

/// The kinds of entity that replicate.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A note node of the tree.
    Note,
    /// A structural parent-child edge.
    Branch,
    /// A label or relation attached to a note.
    Attribute,
    /// An append-style history snapshot of a note.
    Revision,
    /// A file attached to a note or revision.
    Attachment,
    /// Opaque content referenced by notes, revisions and attachments.
    Blob,
    /// A document option (only synced options replicate).
    Option,
    /// The complete child ordering of one parent.
    NoteReordering,
}

impl EntityKind {
    /// Every kind, in wire order.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Note,
        EntityKind::Branch,
        EntityKind::Attribute,
        EntityKind::Revision,
        EntityKind::Attachment,
        EntityKind::Blob,
        EntityKind::Option,
        EntityKind::NoteReordering,
    ];

    /// Wire and storage name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::Branch => "branch",
            EntityKind::Attribute => "attribute",
            EntityKind::Revision => "revision",
            EntityKind::Attachment => "attachment",
            EntityKind::Blob => "blob",
            EntityKind::Option => "option",
            EntityKind::NoteReordering => "note_reordering",
        }
    }

    /// Whether rows of this kind are stored as rows of their own.
    ///
    /// A reordering only rewrites edge positions; it has no row and takes no
    /// part in content hashing.
    pub fn is_stored(&self) -> bool {
        !matches!(self, EntityKind::NoteReordering)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::UnknownEntityKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_id_base64_display() {
        let id = OriginId::random();
        assert_eq!(id.as_str().len(), 12); // 9 bytes = 12 base64 chars
    }

    #[test]
    fn origin_ids_are_unique() {
        assert_ne!(OriginId::random(), OriginId::random());
    }

    #[test]
    fn origin_id_rejects_empty() {
        assert!(OriginId::from_string("").is_err());
        assert_eq!(OriginId::from_string("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn change_id_ordering() {
        assert!(ChangeId::new(100) < ChangeId::new(200));
        assert_eq!(ChangeId::new(100).next().value(), 101);
        assert_eq!(ChangeId::zero().value(), 0);
    }

    #[test]
    fn change_id_saturating_add() {
        let c = ChangeId::new(u64::MAX);
        assert_eq!(c.next().value(), u64::MAX);
    }

    #[test]
    fn entity_kind_parses_wire_names() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!(matches!(
            "notes".parse::<EntityKind>(),
            Err(SyncError::UnknownEntityKind(_))
        ));
    }

    #[test]
    fn entity_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&EntityKind::NoteReordering).unwrap();
        assert_eq!(json, "\"note_reordering\"");
    }

    #[test]
    fn only_reordering_is_unstored() {
        let unstored: Vec<_> = EntityKind::ALL
            .into_iter()
            .filter(|k| !k.is_stored())
            .collect();
        assert_eq!(unstored, vec![EntityKind::NoteReordering]);
    }
}
