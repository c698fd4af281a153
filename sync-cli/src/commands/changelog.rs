//! Changelog maintenance: fill missing entries and drop orphaned ones.

use anyhow::Result;

use crate::config::Replica;

/// Create entries for entities that have none. Existing entries are untouched.
pub async fn fill(replica: &Replica) -> Result<u64> {
    let created = replica
        .store
        .fill_missing_changes(replica.sources.current_origin_id())
        .await?;
    println!("Created {created} missing changelog entries");
    Ok(created)
}

/// Delete entries whose entity no longer exists and was not erased.
pub async fn purge(replica: &Replica) -> Result<u64> {
    let purged = replica.store.purge_orphan_changes().await?;
    println!("Purged {purged} orphaned changelog entries");
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_store::{EntityStore, SqliteStore};
    use sync_types::{EntityKind, EntityRow, Note, Timestamp};

    fn note(id: &str) -> EntityRow {
        EntityRow::Note(Note {
            note_id: id.into(),
            title: id.into(),
            note_type: "text".into(),
            mime: "text/html".into(),
            blob_id: None,
            is_protected: false,
            is_deleted: false,
            utc_date_modified: Timestamp::from_millis(100),
        })
    }

    #[tokio::test]
    async fn fill_leaves_existing_entries_alone() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let replica = Replica::from_store(store).await.unwrap();
        let entry = replica
            .store
            .save(&note("N1"), replica.sources.current_origin_id())
            .await
            .unwrap();

        assert_eq!(fill(&replica).await.unwrap(), 0);
        let current = replica
            .store
            .current_change(EntityKind::Note, "N1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, entry.id);
    }

    #[tokio::test]
    async fn purge_on_a_clean_changelog_removes_nothing() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let replica = Replica::from_store(store).await.unwrap();
        replica
            .store
            .save(&note("N1"), replica.sources.current_origin_id())
            .await
            .unwrap();

        assert_eq!(purge(&replica).await.unwrap(), 0);
        assert!(replica.store.get(EntityKind::Note, "N1").await.unwrap().is_some());
    }
}
