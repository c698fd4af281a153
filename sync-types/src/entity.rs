//! Replicated entity rows.
//!
//! Every kind of [`EntityKind`] has a row type here. Rows are plain data:
//! they know their id, their supersession stamp and how to hash themselves,
//! nothing about storage or transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::{EntityKind, SyncError, Timestamp};

/// Id of the tree root. The root is the only note without a parent edge.
pub const ROOT_NOTE_ID: &str = "root";

/// Behaviour shared by every replicated row type.
pub trait SyncEntity: Serialize {
    /// Kind this row type replicates as.
    const KIND: EntityKind;

    /// Identity of the row within its kind.
    fn entity_id(&self) -> &str;

    /// Timestamp compared by last-write-wins.
    ///
    /// `None` for kinds that always apply.
    fn supersession(&self) -> Option<Timestamp>;

    /// Whether the row is soft-deleted.
    fn is_deleted(&self) -> bool {
        false
    }

    /// Soft-delete the row, stamping it with `at`.
    ///
    /// Returns `false` for kinds that cannot be soft-deleted.
    fn mark_deleted(&mut self, _at: Timestamp) -> bool {
        false
    }
}

/// A note node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Note id.
    pub note_id: String,
    /// Title.
    pub title: String,
    /// Note type (text, code, ...).
    #[serde(rename = "type")]
    pub note_type: String,
    /// MIME type of the content.
    pub mime: String,
    /// Content blob, if any.
    pub blob_id: Option<String>,
    /// Content is encrypted and opaque.
    pub is_protected: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn entity_id(&self) -> &str {
        &self.note_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self, at: Timestamp) -> bool {
        self.is_deleted = true;
        self.utc_date_modified = at;
        true
    }
}

/// A structural parent-child edge of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Edge id.
    pub branch_id: String,
    /// Child note.
    pub note_id: String,
    /// Parent note.
    pub parent_note_id: String,
    /// Sort position among the parent's children.
    pub note_position: i64,
    /// Optional prefix shown before the child title.
    pub prefix: Option<String>,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for Branch {
    const KIND: EntityKind = EntityKind::Branch;

    fn entity_id(&self) -> &str {
        &self.branch_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self, at: Timestamp) -> bool {
        self.is_deleted = true;
        self.utc_date_modified = at;
        true
    }
}

/// Kind of an [`Attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Name/value label.
    Label,
    /// Link to another note; the value is the target note id.
    Relation,
}

/// A label or relation owned by a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Attribute id.
    pub attribute_id: String,
    /// Owning note.
    pub note_id: String,
    /// Label or relation.
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: String,
    /// Sort position on the owning note.
    pub position: i64,
    /// Whether descendants inherit the attribute.
    pub is_inheritable: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for Attribute {
    const KIND: EntityKind = EntityKind::Attribute;

    fn entity_id(&self) -> &str {
        &self.attribute_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self, at: Timestamp) -> bool {
        self.is_deleted = true;
        self.utc_date_modified = at;
        true
    }
}

/// A history snapshot of a note, covering the edit window `from..to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Revision id.
    pub revision_id: String,
    /// Note this is a snapshot of.
    pub note_id: String,
    /// Title at snapshot time.
    pub title: String,
    /// Snapshot content blob.
    pub blob_id: Option<String>,
    /// Content is encrypted and opaque.
    pub is_protected: bool,
    /// Start of the covered edit window.
    pub utc_date_modified_from: Timestamp,
    /// End of the covered edit window; revisions supersede by this.
    pub utc_date_modified_to: Timestamp,
}

impl SyncEntity for Revision {
    const KIND: EntityKind = EntityKind::Revision;

    fn entity_id(&self) -> &str {
        &self.revision_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified_to)
    }
}

/// A file attached to a note or revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Attachment id.
    pub attachment_id: String,
    /// Owning note or revision.
    pub owner_id: String,
    /// Role (image, file, ...).
    pub role: String,
    /// MIME type.
    pub mime: String,
    /// Display title.
    pub title: String,
    /// Content blob.
    pub blob_id: Option<String>,
    /// Sort position on the owner.
    pub position: i64,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for Attachment {
    const KIND: EntityKind = EntityKind::Attachment;

    fn entity_id(&self) -> &str {
        &self.attachment_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self, at: Timestamp) -> bool {
        self.is_deleted = true;
        self.utc_date_modified = at;
        true
    }
}

/// Opaque content. Protected content arrives already encrypted and is
/// carried byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Blob id.
    pub blob_id: String,
    /// Raw content, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for Blob {
    const KIND: EntityKind = EntityKind::Blob;

    fn entity_id(&self) -> &str {
        &self.blob_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }
}

/// A document option. Only options with `is_synced` replicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRow {
    /// Option name (its id).
    pub name: String,
    /// Option value.
    pub value: String,
    /// Whether the option replicates.
    pub is_synced: bool,
    /// Last modification.
    pub utc_date_modified: Timestamp,
}

impl SyncEntity for OptionRow {
    const KIND: EntityKind = EntityKind::Option;

    fn entity_id(&self) -> &str {
        &self.name
    }

    fn supersession(&self) -> Option<Timestamp> {
        Some(self.utc_date_modified)
    }
}

/// The full position map of one parent's live children.
///
/// Keyed by the parent note id; always applied on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteReordering {
    /// Parent whose children are reordered.
    pub parent_note_id: String,
    /// Edge id to position.
    pub ordering: BTreeMap<String, i64>,
}

impl SyncEntity for NoteReordering {
    const KIND: EntityKind = EntityKind::NoteReordering;

    fn entity_id(&self) -> &str {
        &self.parent_note_id
    }

    fn supersession(&self) -> Option<Timestamp> {
        None
    }
}

/// A row of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRow {
    /// A note.
    Note(Note),
    /// A structural edge.
    Branch(Branch),
    /// An attribute.
    Attribute(Attribute),
    /// A revision.
    Revision(Revision),
    /// An attachment.
    Attachment(Attachment),
    /// A blob.
    Blob(Blob),
    /// A document option.
    Option(OptionRow),
    /// A reordering of one parent's children.
    NoteReordering(NoteReordering),
}

macro_rules! dispatch {
    ($row:expr, $inner:ident => $body:expr) => {
        match $row {
            EntityRow::Note($inner) => $body,
            EntityRow::Branch($inner) => $body,
            EntityRow::Attribute($inner) => $body,
            EntityRow::Revision($inner) => $body,
            EntityRow::Attachment($inner) => $body,
            EntityRow::Blob($inner) => $body,
            EntityRow::Option($inner) => $body,
            EntityRow::NoteReordering($inner) => $body,
        }
    };
}

impl EntityRow {
    /// Kind of the row.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRow::Note(_) => Note::KIND,
            EntityRow::Branch(_) => Branch::KIND,
            EntityRow::Attribute(_) => Attribute::KIND,
            EntityRow::Revision(_) => Revision::KIND,
            EntityRow::Attachment(_) => Attachment::KIND,
            EntityRow::Blob(_) => Blob::KIND,
            EntityRow::Option(_) => OptionRow::KIND,
            EntityRow::NoteReordering(_) => NoteReordering::KIND,
        }
    }

    /// Id of the row within its kind.
    pub fn entity_id(&self) -> &str {
        dispatch!(self, row => row.entity_id())
    }

    /// Timestamp compared by last-write-wins, `None` for always-apply kinds.
    pub fn supersession(&self) -> Option<Timestamp> {
        dispatch!(self, row => row.supersession())
    }

    /// Whether the row is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        dispatch!(self, row => row.is_deleted())
    }

    /// Soft-delete the row. Returns `false` if the kind has no soft delete.
    pub fn mark_deleted(&mut self, at: Timestamp) -> bool {
        dispatch!(self, row => row.mark_deleted(at))
    }

    /// Whether changes to this row replicate at all.
    pub fn is_synced(&self) -> bool {
        match self {
            EntityRow::Option(option) => option.is_synced,
            _ => true,
        }
    }

    /// Encode the row as its JSON wire payload.
    pub fn to_json(&self) -> Result<Value, SyncError> {
        let value = dispatch!(self, row => serde_json::to_value(row))?;
        Ok(value)
    }

    /// Decode a JSON wire payload of the given kind.
    pub fn from_json(kind: EntityKind, value: Value) -> Result<Self, SyncError> {
        let row = match kind {
            EntityKind::Note => EntityRow::Note(serde_json::from_value(value)?),
            EntityKind::Branch => EntityRow::Branch(serde_json::from_value(value)?),
            EntityKind::Attribute => EntityRow::Attribute(serde_json::from_value(value)?),
            EntityKind::Revision => EntityRow::Revision(serde_json::from_value(value)?),
            EntityKind::Attachment => EntityRow::Attachment(serde_json::from_value(value)?),
            EntityKind::Blob => EntityRow::Blob(serde_json::from_value(value)?),
            EntityKind::Option => EntityRow::Option(serde_json::from_value(value)?),
            EntityKind::NoteReordering => {
                EntityRow::NoteReordering(serde_json::from_value(value)?)
            }
        };
        Ok(row)
    }

    /// Content hash of the row: hex SHA-256 of its canonical JSON.
    ///
    /// Two replicas holding the same row produce the same hash.
    pub fn content_hash(&self) -> Result<String, SyncError> {
        let bytes = dispatch!(self, row => serde_json::to_vec(row))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
