//! Prometheus metrics endpoint.

use crate::server::SyncServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(server): Extension<Arc<SyncServer>>) -> impl IntoResponse {
    let m = server.metrics();

    // Gauges
    let sessions = server.session_count();
    let max_change_id = server
        .store()
        .max_change_id()
        .await
        .map(|id| id.value())
        .unwrap_or(0);

    // Counters
    let logins = m.logins_total.load(Ordering::Relaxed);
    let rejections = m.login_rejections_total.load(Ordering::Relaxed);
    let entries = m.entries_served_total.load(Ordering::Relaxed);
    let entities = m.entities_served_total.load(Ordering::Relaxed);
    let applied = m.pushes_applied_total.load(Ordering::Relaxed);
    let ignored = m.pushes_ignored_total.load(Ordering::Relaxed);
    let conflicts = m.conflicts_observed_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP treesync_sessions_active Number of live login sessions
# TYPE treesync_sessions_active gauge
treesync_sessions_active {sessions}

# HELP treesync_changelog_max_id Highest synced changelog id
# TYPE treesync_changelog_max_id gauge
treesync_changelog_max_id {max_change_id}

# HELP treesync_info Server information
# TYPE treesync_info gauge
treesync_info{{version="{version}"}} 1

# HELP treesync_logins_total Successful logins
# TYPE treesync_logins_total counter
treesync_logins_total {logins}

# HELP treesync_login_rejections_total Refused logins
# TYPE treesync_login_rejections_total counter
treesync_login_rejections_total {rejections}

# HELP treesync_entries_served_total Changelog entries returned by the changed feed
# TYPE treesync_entries_served_total counter
treesync_entries_served_total {entries}

# HELP treesync_entities_served_total Entity payloads returned
# TYPE treesync_entities_served_total counter
treesync_entities_served_total {entities}

# HELP treesync_pushes_applied_total Pushed entities written or erased
# TYPE treesync_pushes_applied_total counter
treesync_pushes_applied_total {applied}

# HELP treesync_pushes_ignored_total Pushed entities already present or stale
# TYPE treesync_pushes_ignored_total counter
treesync_pushes_ignored_total {ignored}

# HELP treesync_conflicts_observed_total Stale pushes that differed from the local value
# TYPE treesync_conflicts_observed_total counter
treesync_conflicts_observed_total {conflicts}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
