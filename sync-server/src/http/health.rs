//! Health check endpoint.

use crate::server::SyncServer;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use sync_types::{ChangeId, OriginId};

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok`, or `degraded` when the store cannot be read.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Origin of this boot.
    pub origin_id: OriginId,
    /// Highest synced changelog id, if the store answered.
    pub max_change_id: Option<ChangeId>,
    /// Number of live login sessions.
    pub sessions: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(server): Extension<Arc<SyncServer>>) -> Json<HealthStatus> {
    let max_change_id = match server.store().max_change_id().await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!("Health check could not read the changelog: {}", e);
            None
        }
    };

    Json(HealthStatus {
        status: if max_change_id.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        origin_id: server.origin_id().clone(),
        max_change_id,
        sessions: server.session_count(),
        uptime_seconds: server.uptime().as_secs(),
    })
}
