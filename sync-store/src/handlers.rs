//! Per-kind storage handlers.
//!
//! The store never switches on entity kind. Each kind registers a
//! [`KindHandler`] at startup and the store dispatches through the
//! [`HandlerRegistry`].

use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use sync_core::kind_hash;
use sync_types::{Branch, EntityKind, EntityRow, NoteReordering, Timestamp};

use crate::error::{StorageError, StorageResult};

pub(crate) const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS entities (
        kind TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        utc_date_modified INTEGER NOT NULL,
        PRIMARY KEY (kind, entity_id)
    )
"#;

/// How one entity kind is read, written, deleted and hashed.
#[async_trait]
pub trait KindHandler: Send + Sync {
    /// The kind handled.
    fn kind(&self) -> EntityKind;

    /// Load one entity.
    async fn get(
        &self,
        conn: &mut SqliteConnection,
        entity_id: &str,
    ) -> StorageResult<Option<EntityRow>>;

    /// Write one entity.
    async fn save(&self, conn: &mut SqliteConnection, row: &EntityRow) -> StorageResult<()>;

    /// Remove one entity for good.
    async fn erase(&self, conn: &mut SqliteConnection, entity_id: &str) -> StorageResult<()>;

    /// Hash of every replicated entity of the kind, `None` if the kind is
    /// not hashed.
    async fn compute_hash(&self, conn: &mut SqliteConnection) -> StorageResult<Option<String>>;

    /// Soft-delete one entity and return the updated row.
    async fn mark_deleted(
        &self,
        conn: &mut SqliteConnection,
        entity_id: &str,
        at: Timestamp,
    ) -> StorageResult<EntityRow> {
        let mut row = self
            .get(conn, entity_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: self.kind(),
                entity_id: entity_id.to_string(),
            })?;
        if !row.mark_deleted(at) {
            return Err(StorageError::NotDeletable { kind: self.kind() });
        }
        self.save(conn, &row).await?;
        Ok(row)
    }
}

/// Handlers keyed by kind.
pub struct HandlerRegistry {
    handlers: HashMap<EntityKind, Box<dyn KindHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in handler of every kind.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in EntityKind::ALL {
            if kind.is_stored() {
                registry.register(Box::new(RowHandler { kind }));
            }
        }
        registry.register(Box::new(ReorderingHandler));
        registry
    }

    /// Add or replace the handler of its kind.
    pub fn register(&mut self, handler: Box<dyn KindHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Handler of `kind`.
    pub fn handler(&self, kind: EntityKind) -> StorageResult<&dyn KindHandler> {
        self.handlers
            .get(&kind)
            .map(|h| h.as_ref())
            .ok_or(StorageError::NoHandler { kind })
    }

    /// Registered kinds in wire order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Kinds stored as JSON payload rows in the `entities` table.
struct RowHandler {
    kind: EntityKind,
}

#[async_trait]
impl KindHandler for RowHandler {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn get(
        &self,
        conn: &mut SqliteConnection,
        entity_id: &str,
    ) -> StorageResult<Option<EntityRow>> {
        load_row(conn, self.kind, entity_id).await
    }

    async fn save(&self, conn: &mut SqliteConnection, row: &EntityRow) -> StorageResult<()> {
        write_row(conn, row).await
    }

    async fn erase(&self, conn: &mut SqliteConnection, entity_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM entities WHERE kind = ?1 AND entity_id = ?2")
            .bind(self.kind.as_str())
            .bind(entity_id)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn compute_hash(&self, conn: &mut SqliteConnection) -> StorageResult<Option<String>> {
        let rows = load_rows(conn, self.kind).await?;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows.into_iter().filter(EntityRow::is_synced) {
            pairs.push((row.entity_id().to_string(), row.content_hash()?));
        }
        Ok(Some(kind_hash(pairs)))
    }
}

/// Reorderings have no row: they rewrite the positions of one parent's
/// live edges.
struct ReorderingHandler;

#[async_trait]
impl KindHandler for ReorderingHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::NoteReordering
    }

    async fn get(
        &self,
        conn: &mut SqliteConnection,
        parent_note_id: &str,
    ) -> StorageResult<Option<EntityRow>> {
        let ordering: BTreeMap<String, i64> = live_children(conn, parent_note_id)
            .await?
            .into_iter()
            .map(|b| (b.branch_id, b.note_position))
            .collect();

        if ordering.is_empty() {
            return Ok(None);
        }
        Ok(Some(EntityRow::NoteReordering(NoteReordering {
            parent_note_id: parent_note_id.to_string(),
            ordering,
        })))
    }

    async fn save(&self, conn: &mut SqliteConnection, row: &EntityRow) -> StorageResult<()> {
        let EntityRow::NoteReordering(reordering) = row else {
            return Err(StorageError::NoHandler { kind: row.kind() });
        };

        for mut branch in live_children(conn, &reordering.parent_note_id).await? {
            if let Some(&position) = reordering.ordering.get(&branch.branch_id) {
                if branch.note_position != position {
                    branch.note_position = position;
                    write_row(conn, &EntityRow::Branch(branch)).await?;
                }
            }
        }
        Ok(())
    }

    async fn erase(&self, _conn: &mut SqliteConnection, _entity_id: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn compute_hash(&self, _conn: &mut SqliteConnection) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn mark_deleted(
        &self,
        _conn: &mut SqliteConnection,
        _entity_id: &str,
        _at: Timestamp,
    ) -> StorageResult<EntityRow> {
        Err(StorageError::NotDeletable {
            kind: EntityKind::NoteReordering,
        })
    }
}

async fn live_children(
    conn: &mut SqliteConnection,
    parent_note_id: &str,
) -> StorageResult<Vec<Branch>> {
    Ok(load_branches(conn)
        .await?
        .into_iter()
        .filter(|b| !b.is_deleted && b.parent_note_id == parent_note_id)
        .collect())
}

pub(crate) async fn load_row(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
) -> StorageResult<Option<EntityRow>> {
    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload FROM entities WHERE kind = ?1 AND entity_id = ?2")
            .bind(kind.as_str())
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StorageError::Database)?;

    payload.map(|p| decode(kind, &p)).transpose()
}

pub(crate) async fn load_rows(
    conn: &mut SqliteConnection,
    kind: EntityKind,
) -> StorageResult<Vec<EntityRow>> {
    let payloads: Vec<String> =
        sqlx::query_scalar("SELECT payload FROM entities WHERE kind = ?1 ORDER BY entity_id")
            .bind(kind.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(StorageError::Database)?;

    payloads.iter().map(|p| decode(kind, p)).collect()
}

pub(crate) async fn load_branches(conn: &mut SqliteConnection) -> StorageResult<Vec<Branch>> {
    Ok(load_rows(conn, EntityKind::Branch)
        .await?
        .into_iter()
        .filter_map(|row| match row {
            EntityRow::Branch(branch) => Some(branch),
            _ => None,
        })
        .collect())
}

pub(crate) async fn write_row(conn: &mut SqliteConnection, row: &EntityRow) -> StorageResult<()> {
    let payload = row.to_json()?.to_string();
    let modified = row.supersession().map(|t| t.as_millis()).unwrap_or(0);

    sqlx::query(
        r#"
        INSERT INTO entities (kind, entity_id, payload, is_deleted, utc_date_modified)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(kind, entity_id) DO UPDATE SET
            payload = excluded.payload,
            is_deleted = excluded.is_deleted,
            utc_date_modified = excluded.utc_date_modified
        "#,
    )
    .bind(row.kind().as_str())
    .bind(row.entity_id())
    .bind(payload)
    .bind(row.is_deleted())
    .bind(modified)
    .execute(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    Ok(())
}

pub(crate) fn decode(kind: EntityKind, payload: &str) -> StorageResult<EntityRow> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(sync_types::SyncError::from)?;
    Ok(EntityRow::from_json(kind, value)?)
}
