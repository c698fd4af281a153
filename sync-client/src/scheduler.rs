//! Background timers for sync runs and consistency checks.

use crate::checker::ConsistencyChecker;
use crate::engine::{SyncEngine, SyncOutcome};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// When a periodic task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Whether the task runs at all.
    pub enabled: bool,
    /// Delay before the first run.
    pub initial_delay: Duration,
    /// Time between runs.
    pub interval: Duration,
}

impl Schedule {
    /// Sync runs: five seconds after startup, then every minute.
    pub fn sync_default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(60),
        }
    }

    /// Consistency checks: ten seconds after startup, then hourly.
    pub fn checks_default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Spawn the periodic sync task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sync_task<T: Transport + 'static>(
    engine: Arc<SyncEngine<T>>,
    schedule: Schedule,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !schedule.enabled {
            tracing::info!("Sync timer disabled");
            return;
        }

        tracing::info!("Sync timer started (interval: {:?})", schedule.interval);
        let mut timer = interval_at(Instant::now() + schedule.initial_delay, schedule.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match engine.run_once().await {
                SyncOutcome::Completed { .. } => {}
                SyncOutcome::Skipped => tracing::debug!("Sync tick skipped, a run is in progress"),
                SyncOutcome::Failed { reason } => {
                    tracing::debug!("Sync tick failed, retrying next tick: {}", reason)
                }
            }
        }
    })
}

/// Spawn the periodic consistency check task.
pub fn spawn_consistency_task(checker: Arc<ConsistencyChecker>, schedule: Schedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !schedule.enabled {
            tracing::info!("Consistency checks disabled");
            return;
        }

        tracing::info!(
            "Consistency checks started (interval: {:?})",
            schedule.interval
        );
        let mut timer = interval_at(Instant::now() + schedule.initial_delay, schedule.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match checker.run().await {
                Ok(report) if report.is_clean() => tracing::debug!("Consistency checks passed"),
                Ok(report) => tracing::warn!(
                    "Consistency checks found {} violation(s)",
                    report.violations.len()
                ),
                Err(e) => tracing::error!("Consistency check error: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::mutex::SyncMutex;
    use crate::transport::MockTransport;
    use sync_store::{EntityStore, SourceRegistry, SqliteStore};
    use sync_types::OriginId;
    use tokio::sync::broadcast;

    fn every_hour(enabled: bool) -> Schedule {
        Schedule {
            enabled,
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(3600),
        }
    }

    async fn engine() -> (Arc<SyncEngine<MockTransport>>, MockTransport) {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let sources = SourceRegistry::open(store.as_ref()).await.unwrap();
        let transport = MockTransport::new(OriginId::random());
        let engine = SyncEngine::new(
            store,
            sources,
            transport.clone(),
            SyncConfig::new("http://peer", "secret"),
        );
        (Arc::new(engine), transport)
    }

    #[tokio::test]
    async fn sync_task_disabled() {
        let (engine, transport) = engine().await;
        let handle = spawn_sync_task(engine, every_hour(false));

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
        assert!(transport.logins().is_empty());
    }

    #[tokio::test]
    async fn sync_task_runs_after_initial_delay() {
        let (engine, transport) = engine().await;
        let handle = spawn_sync_task(engine, every_hour(true));

        let mut waited = 0;
        while transport.logins().is_empty() && waited < 50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        handle.abort();

        assert_eq!(transport.logins().len(), 1);
    }

    #[tokio::test]
    async fn consistency_task_disabled() {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let (events, _rx) = broadcast::channel(4);
        let checker = Arc::new(ConsistencyChecker::new(store, SyncMutex::new(), events));

        let handle = spawn_consistency_task(checker, every_hour(false));
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
