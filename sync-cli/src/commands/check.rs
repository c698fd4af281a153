//! Run the consistency checker once.

use anyhow::Result;
use sync_client::{ConsistencyChecker, SyncMutex};
use sync_core::ConsistencyReport;
use tokio::sync::broadcast;

use crate::config::Replica;

/// Check the local tree and changelog, printing every violation.
pub async fn run(replica: &Replica) -> Result<ConsistencyReport> {
    let (events, _) = broadcast::channel(16);
    let checker = ConsistencyChecker::new(replica.store.clone(), SyncMutex::new(), events);
    let report = checker.run().await?;

    if report.is_clean() {
        println!("No consistency violations");
    } else {
        println!("{} consistency violation(s):", report.violations.len());
        for violation in &report.violations {
            println!("  - {violation}");
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_core::ConsistencyViolation;
    use sync_store::{EntityStore, SqliteStore};
    use sync_types::{EntityRow, Note, Timestamp, ROOT_NOTE_ID};

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
    async fn orphan_note_is_reported() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let replica = Replica::from_store(store).await.unwrap();
        let origin = replica.sources.current_origin_id();
        replica.store.save(&note(ROOT_NOTE_ID), origin).await.unwrap();
        replica.store.save(&note("N1"), origin).await.unwrap();

        let report = run(&replica).await.unwrap();

        assert_eq!(
            report.violations,
            vec![ConsistencyViolation::MissingParentEdge {
                note_id: "N1".into()
            }]
        );
    }

    #[tokio::test]
    async fn empty_store_is_clean() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let replica = Replica::from_store(store).await.unwrap();

        assert!(run(&replica).await.unwrap().is_clean());
    }
}
