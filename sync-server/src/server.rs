//! The peer side of the sync protocol.
//!
//! SyncServer answers the five `/sync/*` operations against the local store:
//! login, changed feed, entity fetch, push application and hash check.

use crate::config::Config;
use crate::error::ApiError;
use crate::session::SessionTable;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_core::{check_login, ConflictResolver, Resolution, SyncEvent};
use sync_store::{EntityStore, SourceRegistry};
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, EntityRow, LoginRequest, LoginResponse,
    OriginId, PushRequest, Timestamp, MAX_CHANGES_PER_PAGE,
};
use tokio::sync::broadcast;

/// Operational metrics for monitoring peer activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Successful logins.
    pub logins_total: AtomicU64,
    /// Refused logins (version, skew, signature).
    pub login_rejections_total: AtomicU64,
    /// Changelog entries returned by the changed feed.
    pub entries_served_total: AtomicU64,
    /// Entity payloads returned.
    pub entities_served_total: AtomicU64,
    /// Pushed entities written or erased.
    pub pushes_applied_total: AtomicU64,
    /// Pushed entities dropped as stale duplicates or conflicts.
    pub pushes_ignored_total: AtomicU64,
    /// Stale pushes that differed from the local value.
    pub conflicts_observed_total: AtomicU64,
}

/// Peer sync server.
pub struct SyncServer {
    config: Config,
    store: Arc<dyn EntityStore>,
    sources: SourceRegistry,
    resolver: ConflictResolver,
    sessions: SessionTable,
    metrics: ServerMetrics,
    events: broadcast::Sender<SyncEvent>,
    started_at: Instant,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.config)
            .field("origin", self.sources.current_origin_id())
            .field("metrics", &self.metrics)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SyncServer {
    /// Create a server over `store`, answering as `sources`' current origin.
    pub fn new(config: Config, store: Arc<dyn EntityStore>, sources: SourceRegistry) -> Self {
        let sessions = SessionTable::new(config.session_ttl());
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            store,
            sources,
            resolver: ConflictResolver::new(),
            sessions,
            metrics: ServerMetrics::default(),
            events,
            started_at: Instant::now(),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Origin reported to logging-in replicas.
    pub fn origin_id(&self) -> &OriginId {
        self.sources.current_origin_id()
    }

    /// Operational metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Time since the server was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Live session count.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Conflicts observed while applying pushes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel.
    pub fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    /// Verify a login and open a session.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        if let Err(rejection) = check_login(
            request,
            Timestamp::now(),
            self.config.document.secret.as_bytes(),
        ) {
            self.metrics
                .login_rejections_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Login refused: {}", rejection);
            return Err(rejection.into());
        }

        let max_change_id = self.store.max_change_id().await?;
        let session_token = self.sessions.issue();
        self.metrics.logins_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Replica logged in (changelog at {})", max_change_id.value());

        Ok(LoginResponse {
            origin_id: self.origin_id().clone(),
            max_change_id,
            session_token,
        })
    }

    /// Refuse requests without a live session.
    pub fn authorize(&self, token: Option<&str>) -> Result<(), ApiError> {
        match token {
            Some(token) if self.sessions.validate(token) => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }

    /// Synced changes after `since`, at most `limit` (capped).
    pub async fn changed(
        &self,
        since: ChangeId,
        limit: Option<u32>,
    ) -> Result<Vec<ChangedEntry>, ApiError> {
        let limit = limit
            .unwrap_or(MAX_CHANGES_PER_PAGE)
            .clamp(1, MAX_CHANGES_PER_PAGE);
        let entries: Vec<ChangedEntry> = self
            .store
            .changes_since(since, limit)
            .await?
            .iter()
            .map(ChangedEntry::from)
            .collect();

        self.metrics
            .entries_served_total
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            "Serving {} changes after {}",
            entries.len(),
            since.value()
        );
        Ok(entries)
    }

    /// Current payload of one entity.
    pub async fn entity(&self, kind: EntityKind, entity_id: &str) -> Result<Value, ApiError> {
        let row = self
            .store
            .get(kind, entity_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                kind,
                entity_id: entity_id.to_string(),
            })?;
        self.metrics
            .entities_served_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(row.to_json()?)
    }

    /// Apply one pushed entity, or its erasure when `entity` is null.
    pub async fn apply_push(&self, kind: EntityKind, request: PushRequest) -> Result<(), ApiError> {
        let Some(value) = request.entity else {
            if !kind.is_stored() {
                return Err(ApiError::BadRequest(format!("{kind} cannot be erased")));
            }
            self.store
                .erase(kind, &request.entity_id, &request.source_id)
                .await?;
            self.metrics
                .pushes_applied_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Erased {} {} on push", kind, request.entity_id);
            return Ok(());
        };

        let row = EntityRow::from_json(kind, value)?;
        if row.entity_id() != request.entity_id {
            return Err(ApiError::BadRequest(format!(
                "entityId {} does not match payload id {}",
                request.entity_id,
                row.entity_id()
            )));
        }

        match self
            .store
            .apply(&row, &request.source_id, &self.resolver)
            .await?
        {
            Resolution::Apply => {
                self.metrics
                    .pushes_applied_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Applied pushed {} {}", kind, request.entity_id);
            }
            Resolution::Ignore => {
                self.metrics
                    .pushes_ignored_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            Resolution::ConflictLogged(conflict) => {
                self.metrics
                    .pushes_ignored_total
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .conflicts_observed_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Kept local {} {} (modified {:?}) over pushed value ({:?})",
                    conflict.kind,
                    conflict.entity_id,
                    conflict.local,
                    conflict.incoming
                );
                let _ = self.events.send(SyncEvent::ConflictObserved(conflict));
            }
        }
        Ok(())
    }

    /// Highest synced change id and per-kind content hashes.
    pub async fn check(&self) -> Result<CheckResponse, ApiError> {
        Ok(CheckResponse {
            max_change_id: self.store.max_change_id().await?,
            hashes: self.store.content_hashes().await?,
        })
    }
}
