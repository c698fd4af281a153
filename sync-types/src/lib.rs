//! # sync-types
//!
//! Data model and wire types for treesync, a changelog-driven replication
//! engine for hierarchical note documents.
//!
//! This crate provides the foundational types used across all treesync crates:
//! - [`OriginId`], [`ChangeId`], [`EntityKind`], [`Timestamp`] - Identity and ordering types
//! - [`EntityRow`] and the per-kind rows ([`Note`], [`Branch`], ...) - Replicated entities
//! - [`ChangeLogEntry`] - One durable "entity X changed" record
//! - [`LoginRequest`], [`ChangedEntry`], [`PushRequest`], ... - JSON wire messages
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod changelog;
mod entity;
mod error;
mod ids;
mod messages;
mod timestamp;

pub use changelog::ChangeLogEntry;
pub use entity::{
    Attachment, Attribute, AttributeType, Blob, Branch, EntityRow, Note, NoteReordering,
    OptionRow, Revision, SyncEntity, ROOT_NOTE_ID,
};
pub use error::SyncError;
pub use ids::{ChangeId, EntityKind, OriginId};
pub use messages::{
    ChangedEntry, CheckResponse, ErrorBody, ErrorCode, LoginRequest, LoginResponse, PushRequest,
    MAX_CHANGES_PER_PAGE, MAX_CLOCK_SKEW_MS, PROTOCOL_VERSION, SESSION_HEADER,
};
pub use timestamp::Timestamp;
