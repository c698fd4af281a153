//! Consistency checker: diagnostic pass over the local tree and changelog.
//!
//! Runs under the sync lock so it never observes a half-applied pull.
//! Findings are logged and broadcast; nothing is repaired.

use std::sync::Arc;
use sync_core::{ConsistencyReport, SyncEvent};
use sync_store::{EntityStore, StorageError};
use tokio::sync::broadcast;

use crate::mutex::SyncMutex;

/// Checks structural invariants of one replica.
pub struct ConsistencyChecker {
    store: Arc<dyn EntityStore>,
    mutex: SyncMutex,
    events: broadcast::Sender<SyncEvent>,
}

impl ConsistencyChecker {
    /// Create a checker sharing the engine's lock and event channel.
    pub fn new(
        store: Arc<dyn EntityStore>,
        mutex: SyncMutex,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            mutex,
            events,
        }
    }

    /// Run every check once, waiting for any sync run to finish first.
    pub async fn run(&self) -> Result<ConsistencyReport, StorageError> {
        let _guard = self.mutex.lock().await;

        let snapshot = self.store.graph_snapshot().await?;
        let report = ConsistencyReport::check(&snapshot);

        if report.is_clean() {
            tracing::debug!(
                "Consistency check passed ({} notes, {} branches)",
                snapshot.notes.len(),
                snapshot.branches.len()
            );
        } else {
            for violation in &report.violations {
                tracing::error!("Consistency violation: {}", violation);
            }
            let _ = self.events.send(SyncEvent::ConsistencyViolations {
                violations: report.violations.clone(),
            });
        }

        Ok(report)
    }
}
