//! treesync-server binary entry point.
//!
//! Usage:
//! ```bash
//! treesync-server --config treesync.toml
//! ```

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use sync_client::{
    spawn_consistency_task, spawn_sync_task, ConsistencyChecker, HttpTransport, SyncEngine,
    SyncMutex,
};
use sync_store::{EntityStore, SourceRegistry, SqliteStore};
use treesync_server::{build_router, Config, SyncServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = get_config_path();
    let config = Config::from_file(&config_path)?;
    tracing::info!(
        "treesync-server v{} (config: {:?})",
        env!("CARGO_PKG_VERSION"),
        config_path
    );

    let store: Arc<dyn EntityStore> = Arc::new(
        SqliteStore::new(&config.storage.database)
            .await
            .with_context(|| format!("opening {:?}", config.storage.database))?,
    );
    let sources = SourceRegistry::open(store.as_ref()).await?;

    let server = Arc::new(SyncServer::new(
        config.clone(),
        Arc::clone(&store),
        sources.clone(),
    ));
    let mutex = SyncMutex::new();
    let mut tasks = Vec::new();

    match &config.sync {
        Some(peer) => {
            let sync_config = peer.sync_config(&config.document.secret);
            let transport = HttpTransport::new(&sync_config)?;
            tracing::info!("Syncing with {}", sync_config.peer_url);
            let engine = SyncEngine::new(Arc::clone(&store), sources, transport, sync_config)
                .with_mutex(mutex.clone())
                .with_events(server.event_sender());
            tasks.push(spawn_sync_task(Arc::new(engine), peer.schedule()));
        }
        None => tracing::info!("No [sync] peer configured, serving only"),
    }

    let checker = ConsistencyChecker::new(store, mutex, server.event_sender());
    tasks.push(spawn_consistency_task(
        Arc::new(checker),
        config.checks.schedule(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("binding {}", config.http.bind_address))?;
    tracing::info!("Listening on {}", config.http.bind_address);

    axum::serve(listener, build_router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in tasks {
        task.abort();
    }
    tracing::info!("Shut down");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("treesync.toml"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
