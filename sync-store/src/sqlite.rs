//! SQLite implementation of [`EntityStore`].

use crate::changelog::{self, NewChange};
use crate::error::{StorageError, StorageResult};
use crate::handlers::{self, HandlerRegistry};
use crate::EntityStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use sync_core::{ConflictResolver, ContentHashes, GraphSnapshot, Resolution};
use sync_types::{ChangeId, ChangeLogEntry, EntityKind, EntityRow, Note, OriginId, Timestamp};
use tokio::sync::broadcast;

/// Capacity of the change notification channel. Slow subscribers lag
/// rather than block writers.
const NOTIFY_CAPACITY: usize = 1024;

/// SQLite-backed entity store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    handlers: Arc<HandlerRegistry>,
    notifier: broadcast::Sender<ChangeLogEntry>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// A single connection that never expires, since each `:memory:`
    /// connection is its own database.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StorageResult<Self> {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let store = Self {
            pool,
            handlers: Arc::new(HandlerRegistry::standard()),
            notifier,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        for statement in [
            handlers::CREATE_TABLE,
            changelog::CREATE_TABLE,
            changelog::CREATE_INDEX,
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS origins (
                origin_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
        }
        Ok(())
    }

    fn notify(&self, entries: &[ChangeLogEntry]) {
        for entry in entries {
            // No subscribers is fine.
            let _ = self.notifier.send(entry.clone());
        }
    }

    async fn record_row(
        conn: &mut SqliteConnection,
        row: &EntityRow,
        source_id: &OriginId,
    ) -> StorageResult<ChangeLogEntry> {
        let hash = row.content_hash()?;
        changelog::record(
            conn,
            NewChange {
                kind: row.kind(),
                entity_id: row.entity_id(),
                hash: &hash,
                is_erased: false,
                is_synced: row.is_synced(),
                source_id,
            },
        )
        .await
    }

    /// Soft-delete every live edge of `note_id` inside the caller's transaction.
    async fn cascade_note_delete(
        &self,
        conn: &mut SqliteConnection,
        note_id: &str,
        at: Timestamp,
        source_id: &OriginId,
    ) -> StorageResult<Vec<ChangeLogEntry>> {
        let handler = self.handlers.handler(EntityKind::Branch)?;
        let mut recorded = Vec::new();
        for branch in handlers::load_branches(conn).await? {
            if branch.is_deleted || branch.note_id != note_id {
                continue;
            }
            let row = handler.mark_deleted(conn, &branch.branch_id, at).await?;
            recorded.push(Self::record_row(conn, &row, source_id).await?);
        }
        Ok(recorded)
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get(&self, kind: EntityKind, entity_id: &str) -> StorageResult<Option<EntityRow>> {
        let handler = self.handlers.handler(kind)?;
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        handler.get(&mut *conn, entity_id).await
    }

    async fn save(&self, row: &EntityRow, source_id: &OriginId) -> StorageResult<ChangeLogEntry> {
        let handler = self.handlers.handler(row.kind())?;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        handler.save(&mut *tx, row).await?;
        let entry = Self::record_row(&mut *tx, row, source_id).await?;

        tx.commit().await.map_err(StorageError::Database)?;
        self.notify(std::slice::from_ref(&entry));
        Ok(entry)
    }

    async fn mark_deleted(
        &self,
        kind: EntityKind,
        entity_id: &str,
        source_id: &OriginId,
    ) -> StorageResult<Vec<ChangeLogEntry>> {
        let handler = self.handlers.handler(kind)?;
        let at = Timestamp::now();
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let row = handler.mark_deleted(&mut *tx, entity_id, at).await?;
        let mut recorded = vec![Self::record_row(&mut *tx, &row, source_id).await?];
        if kind == EntityKind::Note {
            recorded.extend(
                self.cascade_note_delete(&mut *tx, entity_id, at, source_id)
                    .await?,
            );
        }

        tx.commit().await.map_err(StorageError::Database)?;
        tracing::debug!(
            "Deleted {} {} ({} changes recorded)",
            kind,
            entity_id,
            recorded.len()
        );
        self.notify(&recorded);
        Ok(recorded)
    }

    async fn erase(
        &self,
        kind: EntityKind,
        entity_id: &str,
        source_id: &OriginId,
    ) -> StorageResult<ChangeLogEntry> {
        let handler = self.handlers.handler(kind)?;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let existing = changelog::current(&mut *tx, kind, entity_id).await?;
        let present = handler.get(&mut *tx, entity_id).await?.is_some();
        if let Some(entry) = existing {
            if entry.is_erased && !present {
                tx.rollback().await.map_err(StorageError::Database)?;
                return Ok(entry);
            }
        }

        handler.erase(&mut *tx, entity_id).await?;
        let entry = changelog::record(
            &mut *tx,
            NewChange {
                kind,
                entity_id,
                hash: ChangeLogEntry::ERASED_HASH,
                is_erased: true,
                is_synced: true,
                source_id,
            },
        )
        .await?;

        tx.commit().await.map_err(StorageError::Database)?;
        self.notify(std::slice::from_ref(&entry));
        Ok(entry)
    }

    async fn apply(
        &self,
        incoming: &EntityRow,
        source_id: &OriginId,
        resolver: &ConflictResolver,
    ) -> StorageResult<Resolution> {
        let handler = self.handlers.handler(incoming.kind())?;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let local = handler.get(&mut *tx, incoming.entity_id()).await?;
        let resolution = match (&local, resolver.resolve(local.as_ref(), incoming)) {
            // Local-only options are never replaced by a peer's copy.
            (Some(EntityRow::Option(option)), _) if !option.is_synced => Resolution::Ignore,
            (Some(current), Resolution::Apply) if current == incoming => Resolution::Ignore,
            (_, other) => other,
        };

        if !resolution.is_apply() {
            tx.rollback().await.map_err(StorageError::Database)?;
            return Ok(resolution);
        }

        handler.save(&mut *tx, incoming).await?;
        let entry = Self::record_row(&mut *tx, incoming, source_id).await?;

        tx.commit().await.map_err(StorageError::Database)?;
        self.notify(std::slice::from_ref(&entry));
        Ok(resolution)
    }

    async fn changes_since(
        &self,
        after: ChangeId,
        limit: u32,
    ) -> StorageResult<Vec<ChangeLogEntry>> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        changelog::since(&mut *conn, after, limit).await
    }

    async fn current_change(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> StorageResult<Option<ChangeLogEntry>> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        changelog::current(&mut *conn, kind, entity_id).await
    }

    async fn max_change_id(&self) -> StorageResult<ChangeId> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        changelog::max_id(&mut *conn).await
    }

    async fn count_changes_after(&self, after: ChangeId) -> StorageResult<u64> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        changelog::count_after(&mut *conn, after).await
    }

    async fn content_hashes(&self) -> StorageResult<ContentHashes> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        let mut hashes = ContentHashes::new();
        for kind in self.handlers.kinds() {
            if let Some(hash) = self.handlers.handler(kind)?.compute_hash(&mut *conn).await? {
                hashes.insert(kind, hash);
            }
        }
        Ok(hashes)
    }

    async fn graph_snapshot(&self) -> StorageResult<GraphSnapshot> {
        // One read transaction, so every query sees the same committed state.
        let mut conn = self.pool.begin().await.map_err(StorageError::Database)?;

        let notes: Vec<Note> = handlers::load_rows(&mut *conn, EntityKind::Note)
            .await?
            .into_iter()
            .filter_map(|row| match row {
                EntityRow::Note(note) => Some(note),
                _ => None,
            })
            .collect();
        let branches = handlers::load_branches(&mut *conn).await?;

        let keys: Vec<(String, String)> = sqlx::query_as("SELECT kind, entity_id FROM entities")
            .fetch_all(&mut *conn)
            .await
            .map_err(StorageError::Database)?;
        let mut entities = BTreeSet::new();
        for (kind, id) in keys {
            entities.insert((kind.parse::<EntityKind>()?, id));
        }

        let changes = changelog::all_keys(&mut *conn).await?;
        conn.commit().await.map_err(StorageError::Database)?;

        Ok(GraphSnapshot {
            notes,
            branches,
            entities,
            changes,
        })
    }

    async fn get_setting(&self, name: &str) -> StorageResult<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    async fn set_setting(&self, name: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn register_origin(&self, origin: &OriginId) -> StorageResult<()> {
        sqlx::query("INSERT OR IGNORE INTO origins (origin_id, created_at) VALUES (?1, ?2)")
            .bind(origin.as_str())
            .bind(Timestamp::now().as_millis())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn known_origins(&self) -> StorageResult<Vec<OriginId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT origin_id FROM origins ORDER BY created_at, origin_id")
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        ids.into_iter()
            .map(|id| OriginId::from_string(id).map_err(StorageError::from))
            .collect()
    }

    async fn fill_missing_changes(&self, source_id: &OriginId) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let missing: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT e.kind, e.payload FROM entities e
            WHERE NOT EXISTS (
                SELECT 1 FROM entity_changes c
                WHERE c.entity_kind = e.kind AND c.entity_id = e.entity_id
            )
            ORDER BY e.kind, e.entity_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let mut recorded = Vec::with_capacity(missing.len());
        for (kind, payload) in missing {
            let row = handlers::decode(kind.parse()?, &payload)?;
            recorded.push(Self::record_row(&mut *tx, &row, source_id).await?);
        }

        tx.commit().await.map_err(StorageError::Database)?;
        if !recorded.is_empty() {
            tracing::info!("Filled {} missing changelog entries", recorded.len());
        }
        self.notify(&recorded);
        Ok(recorded.len() as u64)
    }

    async fn purge_orphan_changes(&self) -> StorageResult<u64> {
        let mut conn = self.pool.acquire().await.map_err(StorageError::Database)?;
        let purged = changelog::purge_orphans(&mut *conn).await?;
        if purged > 0 {
            tracing::info!("Purged {} orphaned changelog entries", purged);
        }
        Ok(purged)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeLogEntry> {
        self.notifier.subscribe()
    }
}
