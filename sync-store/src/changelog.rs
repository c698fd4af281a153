//! The changelog table.
//!
//! One current row per `(entity_kind, entity_id)`. Recording a change uses
//! `INSERT OR REPLACE`, which drops the old row and inserts a new one with a
//! fresh `AUTOINCREMENT` id, so ids never repeat and never go backwards.

use sqlx::SqliteConnection;
use sync_types::{ChangeId, ChangeLogEntry, EntityKind, OriginId, Timestamp};

use crate::error::{StorageError, StorageResult};

pub(crate) const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS entity_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_kind TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        hash TEXT NOT NULL,
        is_erased INTEGER NOT NULL DEFAULT 0,
        utc_date_changed INTEGER NOT NULL,
        is_synced INTEGER NOT NULL DEFAULT 1,
        source_id TEXT NOT NULL,
        UNIQUE(entity_kind, entity_id)
    )
"#;

pub(crate) const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_entity_changes_synced ON entity_changes(is_synced, id)";

/// What to record for one change.
pub(crate) struct NewChange<'a> {
    pub kind: EntityKind,
    pub entity_id: &'a str,
    pub hash: &'a str,
    pub is_erased: bool,
    pub is_synced: bool,
    pub source_id: &'a OriginId,
}

/// Record a change, replacing the entity's previous row.
pub(crate) async fn record(
    conn: &mut SqliteConnection,
    change: NewChange<'_>,
) -> StorageResult<ChangeLogEntry> {
    let now = Timestamp::now();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT OR REPLACE INTO entity_changes
            (entity_kind, entity_id, hash, is_erased, utc_date_changed, is_synced, source_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(change.kind.as_str())
    .bind(change.entity_id)
    .bind(change.hash)
    .bind(change.is_erased)
    .bind(now.as_millis())
    .bind(change.is_synced)
    .bind(change.source_id.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    tracing::debug!(
        "Recorded change {} for {} {} (source {})",
        id,
        change.kind,
        change.entity_id,
        change.source_id
    );

    Ok(ChangeLogEntry {
        id: ChangeId::new(id as u64),
        entity_kind: change.kind,
        entity_id: change.entity_id.to_string(),
        hash: change.hash.to_string(),
        is_erased: change.is_erased,
        utc_date_changed: now,
        is_synced: change.is_synced,
        source_id: change.source_id.clone(),
    })
}

/// Current row of one entity.
pub(crate) async fn current(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
) -> StorageResult<Option<ChangeLogEntry>> {
    let row = sqlx::query_as::<_, ChangeRow>(
        r#"
        SELECT id, entity_kind, entity_id, hash, is_erased, utc_date_changed, is_synced, source_id
        FROM entity_changes
        WHERE entity_kind = ?1 AND entity_id = ?2
        "#,
    )
    .bind(kind.as_str())
    .bind(entity_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    row.map(ChangeLogEntry::try_from).transpose()
}

/// Synced rows after `after`, ascending by id.
pub(crate) async fn since(
    conn: &mut SqliteConnection,
    after: ChangeId,
    limit: u32,
) -> StorageResult<Vec<ChangeLogEntry>> {
    let rows = sqlx::query_as::<_, ChangeRow>(
        r#"
        SELECT id, entity_kind, entity_id, hash, is_erased, utc_date_changed, is_synced, source_id
        FROM entity_changes
        WHERE is_synced = 1 AND id > ?1
        ORDER BY id ASC
        LIMIT ?2
        "#,
    )
    .bind(after.value() as i64)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    rows.into_iter().map(ChangeLogEntry::try_from).collect()
}

/// Highest synced id, zero when there is none.
pub(crate) async fn max_id(conn: &mut SqliteConnection) -> StorageResult<ChangeId> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(id) FROM entity_changes WHERE is_synced = 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(StorageError::Database)?;

    Ok(ChangeId::new(max.unwrap_or(0) as u64))
}

/// Number of synced rows after `after`.
pub(crate) async fn count_after(conn: &mut SqliteConnection, after: ChangeId) -> StorageResult<u64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM entity_changes WHERE is_synced = 1 AND id > ?1")
            .bind(after.value() as i64)
            .fetch_one(&mut *conn)
            .await
            .map_err(StorageError::Database)?;

    Ok(count as u64)
}

/// Every row as `(kind, id, is_erased)`.
pub(crate) async fn all_keys(
    conn: &mut SqliteConnection,
) -> StorageResult<Vec<(EntityKind, String, bool)>> {
    let rows: Vec<(String, String, bool)> =
        sqlx::query_as("SELECT entity_kind, entity_id, is_erased FROM entity_changes")
            .fetch_all(&mut *conn)
            .await
            .map_err(StorageError::Database)?;

    rows.into_iter()
        .map(|(kind, id, erased)| -> StorageResult<(EntityKind, String, bool)> {
            Ok((kind.parse::<EntityKind>()?, id, erased))
        })
        .collect()
}

/// Delete non-erased rows of stored kinds whose entity is gone.
pub(crate) async fn purge_orphans(conn: &mut SqliteConnection) -> StorageResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM entity_changes
        WHERE is_erased = 0
          AND entity_kind != ?1
          AND NOT EXISTS (
              SELECT 1 FROM entities e
              WHERE e.kind = entity_changes.entity_kind
                AND e.entity_id = entity_changes.entity_id
          )
        "#,
    )
    .bind(EntityKind::NoteReordering.as_str())
    .execute(&mut *conn)
    .await
    .map_err(StorageError::Database)?;

    Ok(result.rows_affected())
}

/// Internal row type for changelog queries.
#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    entity_kind: String,
    entity_id: String,
    hash: String,
    is_erased: bool,
    utc_date_changed: i64,
    is_synced: bool,
    source_id: String,
}

impl TryFrom<ChangeRow> for ChangeLogEntry {
    type Error = StorageError;

    fn try_from(row: ChangeRow) -> Result<Self, Self::Error> {
        Ok(ChangeLogEntry {
            id: ChangeId::new(row.id as u64),
            entity_kind: row.entity_kind.parse()?,
            entity_id: row.entity_id,
            hash: row.hash,
            is_erased: row.is_erased,
            utc_date_changed: Timestamp::from_millis(row.utc_date_changed),
            is_synced: row.is_synced,
            source_id: OriginId::from_string(row.source_id)?,
        })
    }
}
