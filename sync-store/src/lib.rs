//! # sync-store
//!
//! Entity storage for treesync replicas.
//!
//! This crate provides:
//! - [`EntityStore`] - the storage contract the sync engine and peer API use
//! - [`SqliteStore`] - the SQLite implementation (WAL mode, sqlx)
//! - A per-kind handler registry, so each [`EntityKind`](sync_types::EntityKind)
//!   decides how it is read, written, deleted and hashed
//! - The changelog: one current row per entity, ids strictly increasing
//! - [`SourceRegistry`] - this replica's origin ids, current and historical
//! - Cursor persistence helpers
//!
//! Every mutation writes the entity and its changelog row in one transaction.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod changelog;
mod cursors;
mod error;
mod handlers;
mod origins;
mod sqlite;

pub use cursors::{load_cursors, persist_cursor, reset_cursors};
pub use error::{StorageError, StorageResult};
pub use handlers::{HandlerRegistry, KindHandler};
pub use origins::SourceRegistry;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use sync_core::{ConflictResolver, ContentHashes, GraphSnapshot, Resolution};
use sync_types::{ChangeId, ChangeLogEntry, EntityKind, EntityRow, OriginId};
use tokio::sync::broadcast;

/// Storage contract of a replica.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load one entity.
    async fn get(&self, kind: EntityKind, entity_id: &str) -> StorageResult<Option<EntityRow>>;

    /// Write an entity and record the change as coming from `source_id`.
    async fn save(&self, row: &EntityRow, source_id: &OriginId) -> StorageResult<ChangeLogEntry>;

    /// Soft-delete an entity.
    ///
    /// Deleting a note also deletes every live edge to it. Returns the
    /// changelog rows written, the entity's own first.
    async fn mark_deleted(
        &self,
        kind: EntityKind,
        entity_id: &str,
        source_id: &OriginId,
    ) -> StorageResult<Vec<ChangeLogEntry>>;

    /// Hard-erase an entity, leaving only an erased changelog row.
    async fn erase(
        &self,
        kind: EntityKind,
        entity_id: &str,
        source_id: &OriginId,
    ) -> StorageResult<ChangeLogEntry>;

    /// Resolve an incoming row against the local one and write it if it wins.
    ///
    /// A written row gets a changelog row stamped with `source_id`, the
    /// process that originally produced the change.
    async fn apply(
        &self,
        incoming: &EntityRow,
        source_id: &OriginId,
        resolver: &ConflictResolver,
    ) -> StorageResult<Resolution>;

    /// Synced changelog rows with id greater than `after`, ascending.
    async fn changes_since(&self, after: ChangeId, limit: u32)
        -> StorageResult<Vec<ChangeLogEntry>>;

    /// Current changelog row of one entity, synced or not.
    async fn current_change(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> StorageResult<Option<ChangeLogEntry>>;

    /// Highest synced changelog id (zero when empty).
    async fn max_change_id(&self) -> StorageResult<ChangeId>;

    /// Number of synced changelog rows with id greater than `after`.
    async fn count_changes_after(&self, after: ChangeId) -> StorageResult<u64>;

    /// Content hash of every stored kind.
    async fn content_hashes(&self) -> StorageResult<ContentHashes>;

    /// Tree and changelog snapshot for the consistency checks.
    async fn graph_snapshot(&self) -> StorageResult<GraphSnapshot>;

    /// Read a local, never-replicated setting.
    async fn get_setting(&self, name: &str) -> StorageResult<Option<String>>;

    /// Write a local, never-replicated setting.
    async fn set_setting(&self, name: &str, value: &str) -> StorageResult<()>;

    /// Persist an origin id this replica uses.
    async fn register_origin(&self, origin: &OriginId) -> StorageResult<()>;

    /// Every origin id this replica has ever used.
    async fn known_origins(&self) -> StorageResult<Vec<OriginId>>;

    /// Record a change for every entity that has no changelog row.
    ///
    /// Existing rows are left alone, so this never forces a full resync.
    async fn fill_missing_changes(&self, source_id: &OriginId) -> StorageResult<u64>;

    /// Delete changelog rows whose entity no longer exists (erasures kept).
    async fn purge_orphan_changes(&self) -> StorageResult<u64>;

    /// Receive every changelog row as it is written.
    fn subscribe(&self) -> broadcast::Receiver<ChangeLogEntry>;
}
