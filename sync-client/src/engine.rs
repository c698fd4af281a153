//! SyncEngine - one replica's side of a sync exchange.
//!
//! The engine drives the pure [`SyncMachine`] from sync-core and performs
//! the I/O each action asks for: login, push loop, pull loop, hash check.
//!
//! ```text
//! EntityStore ──changes_since──► push loop ──push_entity──► peer
//!      ▲                                                     │
//!      └────apply (LWW)──── pull loop ◄──pull_changes────────┘
//! ```
//!
//! Cursors advance and are persisted after every processed entry, so an
//! interrupted run resumes without re-sending or losing anything. A run
//! never returns an error; every failure becomes a [`SyncOutcome`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_core::{
    compare_hashes, sign_login, Action, ConflictResolver, Direction, Event, HashCheck,
    Resolution, SyncCursors, SyncEvent, SyncMachine,
};
use sync_store::{
    load_cursors, persist_cursor, reset_cursors, EntityStore, SourceRegistry, StorageError,
};
use sync_types::{
    ChangeId, ChangeLogEntry, ChangedEntry, EntityRow, ErrorCode, LoginRequest, OriginId,
    PushRequest, Timestamp, PROTOCOL_VERSION,
};
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::error::{ProtocolMismatch, SyncFailure};
use crate::mutex::SyncMutex;
use crate::transport::{FailureReason, Transport, TransportError};

const EVENT_CAPACITY: usize = 256;

/// Result of one call to [`SyncEngine::run_once`].
#[derive(Debug)]
pub enum SyncOutcome {
    /// The run finished.
    Completed {
        /// Push/pull rounds taken.
        rounds: u32,
        /// Entities sent to the peer.
        pushed: u64,
        /// Peer entities written or erased locally.
        pulled: u64,
        /// Result of the content hash comparison.
        hash_check: HashCheck,
    },
    /// The run stopped early. The next tick retries.
    Failed {
        /// What went wrong.
        reason: SyncFailure,
    },
    /// Another run or check held the lock; nothing was done.
    Skipped,
}

impl SyncOutcome {
    /// Whether the run finished.
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }
}

/// Progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Local synced changes not yet pushed.
    pub outstanding_pushes: u64,
    /// Peer changes not yet pulled, as of the last hash check.
    pub outstanding_pulls: u64,
    /// Persisted cursors.
    pub cursors: SyncCursors,
}

#[derive(Default)]
struct Run {
    peer: Option<OriginId>,
    cursors: SyncCursors,
    pushed: u64,
    pulled: u64,
    completed: Option<(u32, HashCheck)>,
    failure: Option<SyncFailure>,
}

/// Replicates one local store with one peer.
pub struct SyncEngine<T: Transport> {
    store: Arc<dyn EntityStore>,
    sources: SourceRegistry,
    transport: T,
    config: SyncConfig,
    resolver: ConflictResolver,
    mutex: SyncMutex,
    events: broadcast::Sender<SyncEvent>,
    outstanding_pulls: AtomicU64,
}

impl<T: Transport> SyncEngine<T> {
    /// Create an engine with its own lock.
    pub fn new(
        store: Arc<dyn EntityStore>,
        sources: SourceRegistry,
        transport: T,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            sources,
            transport,
            config,
            resolver: ConflictResolver::new(),
            mutex: SyncMutex::new(),
            events,
            outstanding_pulls: AtomicU64::new(0),
        }
    }

    /// Share `mutex` instead of the engine's own lock.
    pub fn with_mutex(mut self, mutex: SyncMutex) -> Self {
        self.mutex = mutex;
        self
    }

    /// Report on `events` instead of the engine's own channel.
    pub fn with_events(mut self, events: broadcast::Sender<SyncEvent>) -> Self {
        self.events = events;
        self
    }

    /// Lock guarding runs; share it with the consistency checker.
    pub fn mutex(&self) -> &SyncMutex {
        &self.mutex
    }

    /// The transport in use.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive run milestones, conflicts and hash mismatches.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel, for components that report on it.
    pub fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    /// Whether a run or consistency check holds the lock.
    pub fn is_busy(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Progress counters.
    pub async fn stats(&self) -> Result<SyncStats, StorageError> {
        let cursors = load_cursors(self.store.as_ref()).await?;
        Ok(SyncStats {
            outstanding_pushes: self
                .store
                .count_changes_after(cursors.get(Direction::Push))
                .await?,
            outstanding_pulls: self.outstanding_pulls.load(Ordering::Relaxed),
            cursors,
        })
    }

    /// Reset both cursors so the next run exchanges everything.
    ///
    /// Waits for any run in progress.
    pub async fn force_full_sync(&self) -> Result<(), StorageError> {
        let _guard = self.mutex.lock().await;
        reset_cursors(self.store.as_ref()).await
    }

    /// Run one sync exchange, or skip if one is already in progress.
    pub async fn run_once(&self) -> SyncOutcome {
        let Some(_guard) = self.mutex.try_lock() else {
            tracing::debug!("Sync already in progress, skipping this trigger");
            return SyncOutcome::Skipped;
        };

        let outcome = self.run_locked().await;
        if matches!(outcome, SyncOutcome::Failed { .. }) {
            self.transport.toggle_proxy();
        }
        outcome
    }

    async fn run_locked(&self) -> SyncOutcome {
        let mut run = Run::default();
        let mut queue = VecDeque::new();

        let (mut machine, actions) = SyncMachine::new(self.config.max_rounds).on_event(Event::Start);
        queue.extend(actions);

        while let Some(action) = queue.pop_front() {
            let result = match action {
                Action::EmitEvent(event) => {
                    self.emit(event, &mut run);
                    continue;
                }
                Action::Login => self.login(&mut run).await.map(|()| Event::LoggedIn),
                Action::Push => self.push_changes(&mut run).await.map(|()| Event::PushDrained),
                Action::Pull => self.pull_changes(&mut run).await.map(|()| Event::PullDrained),
                Action::CheckHashes => self.check_hashes(&run).await,
            };

            let event = match result {
                Ok(event) => event,
                Err(failure) => {
                    let reason = failure.to_string();
                    run.failure = Some(failure);
                    Event::Failed { reason }
                }
            };

            let (next, actions) = machine.on_event(event);
            machine = next;
            queue.extend(actions);
        }

        match run.failure {
            Some(reason) => SyncOutcome::Failed { reason },
            None => {
                let (rounds, hash_check) = run.completed.unwrap_or((0, HashCheck::Skipped));
                SyncOutcome::Completed {
                    rounds,
                    pushed: run.pushed,
                    pulled: run.pulled,
                    hash_check,
                }
            }
        }
    }

    fn emit(&self, event: SyncEvent, run: &mut Run) {
        match &event {
            SyncEvent::Started => tracing::info!("Sync started"),
            SyncEvent::Completed { rounds, hash_check } => {
                tracing::info!(
                    "Sync finished after {} round(s): pushed {}, pulled {}",
                    rounds,
                    run.pushed,
                    run.pulled
                );
                run.completed = Some((*rounds, hash_check.clone()));
            }
            SyncEvent::Failed { reason } => tracing::warn!("Sync failed: {}", reason),
            SyncEvent::HashMismatch { kinds } => {
                tracing::warn!("Content hashes differ from the peer for {:?}", kinds)
            }
            SyncEvent::ConflictObserved(conflict) => tracing::warn!(
                "Kept local {} {} (modified {:?}) over older incoming value ({:?})",
                conflict.kind,
                conflict.entity_id,
                conflict.local,
                conflict.incoming
            ),
            SyncEvent::ConsistencyViolations { .. } => {}
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn login(&self, run: &mut Run) -> Result<(), SyncFailure> {
        run.cursors = load_cursors(self.store.as_ref()).await?;

        let timestamp = Timestamp::now();
        let request = LoginRequest {
            timestamp,
            protocol_version: PROTOCOL_VERSION,
            hash: sign_login(self.config.secret.as_bytes(), timestamp),
        };
        let response = self
            .transport
            .login(&request)
            .await
            .map_err(login_failure)?;

        if self.sources.is_local_origin(&response.origin_id) {
            return Err(ProtocolMismatch::SelfLoop(response.origin_id).into());
        }

        let pull = run.cursors.get(Direction::Pull);
        if response.max_change_id < pull {
            tracing::warn!(
                "Peer changelog ends at {} but lastSyncedPull is {}; keeping the cursor \
                 (run force-full-sync if the peer was restored from an older copy)",
                response.max_change_id.value(),
                pull.value()
            );
        }

        tracing::debug!("Logged in to peer {}", response.origin_id);
        run.peer = Some(response.origin_id);
        Ok(())
    }

    async fn push_changes(&self, run: &mut Run) -> Result<(), SyncFailure> {
        let peer = run.peer.clone();
        let mut pushed = 0u64;

        loop {
            let batch = self
                .store
                .changes_since(run.cursors.get(Direction::Push), self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                if peer.as_ref() == Some(&entry.source_id) {
                    tracing::debug!(
                        "Not pushing {} {}: it came from the peer",
                        entry.entity_kind,
                        entry.entity_id
                    );
                } else if self.push_entry(&entry).await? {
                    pushed += 1;
                }
                self.advance(run, Direction::Push, entry.id).await?;
            }
        }

        run.pushed += pushed;
        if pushed > 0 {
            tracing::info!("Pushed {} changes", pushed);
        }
        Ok(())
    }

    async fn push_entry(&self, entry: &ChangeLogEntry) -> Result<bool, SyncFailure> {
        let entity = if entry.is_erased {
            None
        } else {
            match self.store.get(entry.entity_kind, &entry.entity_id).await? {
                Some(row) => Some(row.to_json()?),
                None => {
                    tracing::debug!(
                        "Not pushing {} {}: no current value",
                        entry.entity_kind,
                        entry.entity_id
                    );
                    return Ok(false);
                }
            }
        };

        let request = PushRequest {
            source_id: entry.source_id.clone(),
            entity_id: entry.entity_id.clone(),
            entity,
        };
        self.transport
            .push_entity(entry.entity_kind, &request)
            .await?;
        tracing::debug!(
            "Pushed {} {} (change {})",
            entry.entity_kind,
            entry.entity_id,
            entry.id.value()
        );
        Ok(true)
    }

    async fn pull_changes(&self, run: &mut Run) -> Result<(), SyncFailure> {
        let mut pulled = 0u64;

        loop {
            let since = run.cursors.get(Direction::Pull);
            let batch = self
                .transport
                .pull_changes(since, self.config.batch_size)
                .await?;
            let full_page = batch.len() >= self.config.batch_size as usize;
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                if self.sources.is_local_origin(&entry.source_id) {
                    tracing::debug!(
                        "Not applying {} {}: it is our own change",
                        entry.entity_kind,
                        entry.entity_id
                    );
                } else if self.pull_entry(&entry, run).await? {
                    pulled += 1;
                }
                self.advance(run, Direction::Pull, entry.id).await?;
            }

            // A peer that keeps serving the same page would loop forever.
            if !full_page || run.cursors.get(Direction::Pull) == since {
                break;
            }
        }

        run.pulled += pulled;
        if pulled > 0 {
            tracing::info!("Pulled {} changes", pulled);
        }
        Ok(())
    }

    async fn pull_entry(&self, entry: &ChangedEntry, run: &mut Run) -> Result<bool, SyncFailure> {
        let kind = entry.entity_kind;
        let value = if entry.is_erased {
            None
        } else {
            self.transport.fetch_entity(kind, &entry.entity_id).await?
        };

        let Some(value) = value else {
            if !kind.is_stored() {
                return Ok(false);
            }
            self.store
                .erase(kind, &entry.entity_id, &entry.source_id)
                .await?;
            tracing::debug!("Erased {} {} (gone on peer)", kind, entry.entity_id);
            return Ok(true);
        };

        let row = EntityRow::from_json(kind, value)?;
        match self
            .store
            .apply(&row, &entry.source_id, &self.resolver)
            .await?
        {
            Resolution::Apply => {
                tracing::debug!("Applied {} {} (change {})", kind, entry.entity_id, entry.id.value());
                Ok(true)
            }
            Resolution::Ignore => Ok(false),
            Resolution::ConflictLogged(conflict) => {
                self.emit(SyncEvent::ConflictObserved(conflict), run);
                Ok(false)
            }
        }
    }

    async fn check_hashes(&self, run: &Run) -> Result<Event, SyncFailure> {
        let outstanding_pushes = self
            .store
            .count_changes_after(run.cursors.get(Direction::Push))
            .await?;
        let remote = self.transport.check().await?;
        let outstanding_pulls = remote
            .max_change_id
            .value()
            .saturating_sub(run.cursors.get(Direction::Pull).value());
        self.outstanding_pulls
            .store(outstanding_pulls, Ordering::Relaxed);

        if outstanding_pulls > 0 || outstanding_pushes > 0 {
            tracing::info!(
                "Outstanding changes (pulls: {}, pushes: {}), skipping content check",
                outstanding_pulls,
                outstanding_pushes
            );
            return Ok(Event::Outstanding);
        }

        let local = self.store.content_hashes().await?;
        let mismatches = compare_hashes(&local, &remote.hashes);
        for mismatch in &mismatches {
            tracing::warn!(
                "Content hash mismatch for {}: local {:?}, peer {:?}",
                mismatch.kind,
                mismatch.local,
                mismatch.remote
            );
        }
        if mismatches.is_empty() {
            tracing::info!("Content hashes match the peer");
        }

        Ok(Event::HashesChecked {
            mismatched: mismatches.into_iter().map(|m| m.kind).collect(),
        })
    }

    async fn advance(
        &self,
        run: &mut Run,
        direction: Direction,
        id: ChangeId,
    ) -> Result<(), SyncFailure> {
        if run.cursors.advance(direction, id) {
            persist_cursor(self.store.as_ref(), direction, id).await?;
        }
        Ok(())
    }
}

fn login_failure(err: TransportError) -> SyncFailure {
    let message = match &err.reason {
        FailureReason::Status { message, .. } => message.clone(),
        other => other.to_string(),
    };
    match err.code() {
        Some(ErrorCode::VersionMismatch) => ProtocolMismatch::VersionMismatch(message).into(),
        Some(ErrorCode::ClockSkew) => ProtocolMismatch::ClockSkew(message).into(),
        Some(ErrorCode::BadCredentials) => ProtocolMismatch::BadCredentials.into(),
        _ => SyncFailure::Transport(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use sync_store::SqliteStore;
    use sync_types::{EntityKind, Note};

    fn peer() -> OriginId {
        OriginId::from_string("peer-origin").unwrap()
    }

    fn note(id: &str, title: &str, modified: i64) -> EntityRow {
        EntityRow::Note(Note {
            note_id: id.into(),
            title: title.into(),
            note_type: "text".into(),
            mime: "text/html".into(),
            blob_id: None,
            is_protected: false,
            is_deleted: false,
            utc_date_modified: Timestamp::from_millis(modified),
        })
    }

    fn changed(id: u64, entity_id: &str, source: &OriginId) -> ChangedEntry {
        ChangedEntry {
            id: ChangeId::new(id),
            entity_kind: EntityKind::Note,
            entity_id: entity_id.into(),
            source_id: source.clone(),
            is_erased: false,
        }
    }

    async fn setup() -> (Arc<dyn EntityStore>, SourceRegistry, MockTransport) {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let sources = SourceRegistry::open(store.as_ref()).await.unwrap();
        (store, sources, MockTransport::new(peer()))
    }

    fn engine(
        store: &Arc<dyn EntityStore>,
        sources: &SourceRegistry,
        transport: &MockTransport,
    ) -> SyncEngine<MockTransport> {
        SyncEngine::new(
            Arc::clone(store),
            sources.clone(),
            transport.clone(),
            SyncConfig::new("http://peer", "secret"),
        )
    }

    async fn match_peer_hashes(store: &Arc<dyn EntityStore>, transport: &MockTransport) {
        transport.set_hashes(store.content_hashes().await.unwrap());
    }

    #[tokio::test]
    async fn pushes_local_changes_and_persists_cursor() {
        let (store, sources, transport) = setup().await;
        let local = sources.current_origin_id().clone();
        store.save(&note("N1", "Hello", 100), &local).await.unwrap();
        let last = store.save(&note("N2", "World", 100), &local).await.unwrap();

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;
        assert!(outcome.is_completed(), "{outcome:?}");

        let pushed = transport.pushed();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].0, EntityKind::Note);
        assert_eq!(pushed[0].1.entity_id, "N1");
        assert_eq!(pushed[0].1.source_id, local);
        assert_eq!(pushed[0].1.entity.as_ref().unwrap()["title"], "Hello");

        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Push), last.id);
        assert_eq!(transport.logins()[0].protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn does_not_push_changes_that_came_from_the_peer() {
        let (store, sources, transport) = setup().await;
        let entry = store.save(&note("N1", "theirs", 100), &peer()).await.unwrap();

        let engine = engine(&store, &sources, &transport);
        engine.run_once().await;

        assert!(transport.pushed().is_empty());
        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Push), entry.id);
    }

    #[tokio::test]
    async fn pulls_peer_changes_with_their_source() {
        let (store, sources, transport) = setup().await;
        let x = OriginId::from_string("replica-x").unwrap();
        let value = note("N1", "Hello", 100).to_json().unwrap();
        transport.add_change(changed(4, "N1", &x), Some(value));

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;

        let SyncOutcome::Completed { pulled, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(pulled, 1);
        assert_eq!(
            store.get(EntityKind::Note, "N1").await.unwrap(),
            Some(note("N1", "Hello", 100))
        );
        let current = store
            .current_change(EntityKind::Note, "N1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.source_id, x);
        // Pulled from a third replica, so it is relayed back; the peer
        // ignores it as a duplicate.
        assert_eq!(transport.pushed().len(), 1);
    }

    #[tokio::test]
    async fn skips_own_changes_but_advances_cursor() {
        let (store, sources, transport) = setup().await;
        let own = sources.current_origin_id().clone();
        transport.add_change(
            changed(7, "N1", &own),
            Some(note("N1", "echo", 100).to_json().unwrap()),
        );

        let engine = engine(&store, &sources, &transport);
        engine.run_once().await;

        assert_eq!(store.get(EntityKind::Note, "N1").await.unwrap(), None);
        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Pull), ChangeId::new(7));
    }

    #[tokio::test]
    async fn erased_on_peer_is_erased_locally() {
        let (store, sources, transport) = setup().await;
        store.save(&note("N1", "doomed", 100), &peer()).await.unwrap();
        let mut entry = changed(3, "N1", &peer());
        entry.is_erased = true;
        transport.add_change(entry, None);

        let engine = engine(&store, &sources, &transport);
        engine.run_once().await;

        assert_eq!(store.get(EntityKind::Note, "N1").await.unwrap(), None);
        let current = store
            .current_change(EntityKind::Note, "N1")
            .await
            .unwrap()
            .unwrap();
        assert!(current.is_erased);
    }

    #[tokio::test]
    async fn stale_incoming_change_is_reported_not_applied() {
        let (store, sources, transport) = setup().await;
        let local = sources.current_origin_id().clone();
        store.save(&note("N1", "A", 200), &local).await.unwrap();
        transport.add_change(
            changed(1, "N1", &peer()),
            Some(note("N1", "B", 150).to_json().unwrap()),
        );

        let engine = engine(&store, &sources, &transport);
        let mut events = engine.subscribe();
        engine.run_once().await;

        assert_eq!(
            store.get(EntityKind::Note, "N1").await.unwrap(),
            Some(note("N1", "A", 200))
        );
        let mut saw_conflict = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ConflictObserved(conflict) = event {
                assert_eq!(conflict.entity_id, "N1");
                assert_eq!(conflict.local, Timestamp::from_millis(200));
                saw_conflict = true;
            }
        }
        assert!(saw_conflict);
    }

    #[tokio::test]
    async fn self_loop_is_refused() {
        let (store, sources, _) = setup().await;
        let transport = MockTransport::new(sources.current_origin_id().clone());
        store
            .save(&note("N1", "x", 100), sources.current_origin_id())
            .await
            .unwrap();

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;

        assert!(matches!(
            outcome,
            SyncOutcome::Failed {
                reason: SyncFailure::ProtocolMismatch(ProtocolMismatch::SelfLoop(_))
            }
        ));
        assert!(transport.pushed().is_empty());
    }

    #[tokio::test]
    async fn login_rejections_become_protocol_mismatches() {
        let (store, sources, transport) = setup().await;
        transport.fail_next_login(FailureReason::Status {
            status: 400,
            code: Some(ErrorCode::ClockSkew),
            message: "clock skew of 9000ms".into(),
        });

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;

        let SyncOutcome::Failed {
            reason: SyncFailure::ProtocolMismatch(ProtocolMismatch::ClockSkew(message)),
        } = outcome
        else {
            panic!("expected clock skew, got {outcome:?}");
        };
        assert!(message.contains("9000"));
    }

    #[tokio::test]
    async fn failed_push_resumes_where_it_stopped() {
        let (store, sources, transport) = setup().await;
        let local = sources.current_origin_id().clone();
        store.save(&note("N1", "one", 100), &local).await.unwrap();
        store.save(&note("N2", "two", 100), &local).await.unwrap();

        let engine = engine(&store, &sources, &transport);

        transport.fail_next_push(FailureReason::Timeout);
        let outcome = engine.run_once().await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(transport.proxy_toggles(), 1);
        assert!(transport.pushed().is_empty());
        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Push), ChangeId::zero());

        let outcome = engine.run_once().await;
        assert!(outcome.is_completed());
        let ids: Vec<_> = transport
            .pushed()
            .into_iter()
            .map(|(_, r)| r.entity_id)
            .collect();
        assert_eq!(ids, vec!["N1", "N2"]);
    }

    #[tokio::test]
    async fn failure_mid_pull_keeps_progress() {
        let (store, sources, transport) = setup().await;
        transport.add_change(
            changed(1, "N1", &peer()),
            Some(note("N1", "one", 100).to_json().unwrap()),
        );
        transport.add_change(
            changed(2, "N2", &peer()),
            Some(note("N2", "two", 100).to_json().unwrap()),
        );

        let engine = SyncEngine::new(
            Arc::clone(&store),
            sources.clone(),
            transport.clone(),
            SyncConfig::new("http://peer", "secret").with_batch_size(1),
        );

        transport.fail_next_fetch(FailureReason::Timeout);
        let outcome = engine.run_once().await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Pull), ChangeId::zero());
        assert_eq!(store.get(EntityKind::Note, "N1").await.unwrap(), None);

        let outcome = engine.run_once().await;
        assert!(outcome.is_completed(), "{outcome:?}");
        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Pull), ChangeId::new(2));
        assert!(store.get(EntityKind::Note, "N2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped() {
        let (store, sources, transport) = setup().await;
        let engine = engine(&store, &sources, &transport);

        let _held = engine.mutex().try_lock().unwrap();
        assert!(engine.is_busy());
        assert!(matches!(engine.run_once().await, SyncOutcome::Skipped));
        assert!(transport.logins().is_empty());
    }

    #[tokio::test]
    async fn shared_event_channel_receives_run_events() {
        let (store, sources, transport) = setup().await;
        let (events, mut received) = broadcast::channel(16);
        let engine = engine(&store, &sources, &transport).with_events(events.clone());

        engine.run_once().await;

        assert_eq!(received.try_recv().unwrap(), SyncEvent::Started);
        let mut own = engine.subscribe();
        events.send(SyncEvent::Started).unwrap();
        assert_eq!(own.try_recv().unwrap(), SyncEvent::Started);
    }

    #[tokio::test]
    async fn caught_up_run_compares_hashes() {
        let (store, sources, transport) = setup().await;
        store
            .save(&note("N1", "x", 100), sources.current_origin_id())
            .await
            .unwrap();
        match_peer_hashes(&store, &transport).await;

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Completed {
                rounds: 1,
                hash_check: HashCheck::Matched,
                ..
            }
        ));

        // Peer diverges on notes only.
        let mut hashes = store.content_hashes().await.unwrap();
        hashes.insert(EntityKind::Note, "different".into());
        transport.set_hashes(hashes);

        let mut events = engine.subscribe();
        let outcome = engine.run_once().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Completed {
                hash_check: HashCheck::Mismatched(ref kinds),
                ..
            } if kinds == &vec![EntityKind::Note]
        ));
        let mut saw_mismatch = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::HashMismatch { .. }) {
                saw_mismatch = true;
            }
        }
        assert!(saw_mismatch);
    }

    #[tokio::test]
    async fn outstanding_changes_loop_until_max_rounds() {
        let (store, sources, transport) = setup().await;
        // Peer claims changes it never serves.
        transport.set_max_change_id(ChangeId::new(50));

        let engine = SyncEngine::new(
            Arc::clone(&store),
            sources.clone(),
            transport.clone(),
            SyncConfig::new("http://peer", "secret").with_max_rounds(2),
        );
        let outcome = engine.run_once().await;

        assert!(matches!(
            outcome,
            SyncOutcome::Completed {
                rounds: 2,
                hash_check: HashCheck::Skipped,
                ..
            }
        ));
        assert_eq!(engine.stats().await.unwrap().outstanding_pulls, 50);
    }

    #[tokio::test]
    async fn cursors_never_move_back() {
        let (store, sources, transport) = setup().await;
        persist_cursor(store.as_ref(), Direction::Pull, ChangeId::new(40))
            .await
            .unwrap();
        // Peer reports a shorter changelog than we already pulled.
        transport.add_change(
            changed(3, "N1", &peer()),
            Some(note("N1", "x", 100).to_json().unwrap()),
        );

        let engine = engine(&store, &sources, &transport);
        engine.run_once().await;

        let cursors = load_cursors(store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Pull), ChangeId::new(40));
        assert_eq!(transport.pull_requests()[0], ChangeId::new(40));
    }

    #[tokio::test]
    async fn force_full_sync_resets_cursors() {
        let (store, sources, transport) = setup().await;
        store
            .save(&note("N1", "x", 100), sources.current_origin_id())
            .await
            .unwrap();

        let engine = engine(&store, &sources, &transport);
        engine.run_once().await;
        assert_eq!(engine.stats().await.unwrap().outstanding_pushes, 0);

        engine.force_full_sync().await.unwrap();
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.cursors, SyncCursors::default());
        assert_eq!(stats.outstanding_pushes, 1);
    }

    #[tokio::test]
    async fn unfetchable_reordering_is_skipped() {
        let (store, sources, transport) = setup().await;
        transport.add_change(
            ChangedEntry {
                id: ChangeId::new(1),
                entity_kind: EntityKind::NoteReordering,
                entity_id: "P".into(),
                source_id: peer(),
                is_erased: false,
            },
            None,
        );

        let engine = engine(&store, &sources, &transport);
        let outcome = engine.run_once().await;

        let SyncOutcome::Completed { pulled, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(pulled, 0);
    }
}
