//! HTTP endpoints for treesync-server.
//!
//! Serves the peer sync API plus health and metrics.

pub mod health;
mod metrics;
mod sync;

use crate::server::SyncServer;
use axum::{
    routing::{get, post, put},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(server: Arc<SyncServer>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/sync/login", post(sync::login_handler))
        .route("/sync/changed", get(sync::changed_handler))
        .route("/sync/check", get(sync::check_handler))
        .route("/sync/:kind", put(sync::push_handler))
        .route("/sync/:kind/:id", get(sync::entity_handler));

    if server.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(server))
}
