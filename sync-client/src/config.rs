//! Sync engine configuration.

use std::path::PathBuf;
use std::time::Duration;
use sync_types::MAX_CHANGES_PER_PAGE;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default page size of the changed feed.
pub const DEFAULT_BATCH_SIZE: u32 = MAX_CHANGES_PER_PAGE;

/// Default bound on push/pull rounds per run.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Where and how to sync.
#[derive(Clone)]
pub struct SyncConfig {
    /// Base URL of the peer, e.g. `https://notes.example.com`.
    pub peer_url: String,
    /// Shared document secret used to sign the login.
    pub secret: String,
    /// Timeout of every request.
    pub timeout: Duration,
    /// Optional outbound proxy URL.
    pub proxy: Option<String>,
    /// Optional PEM file holding a TLS client certificate and key.
    pub tls_client_cert: Option<PathBuf>,
    /// Page size when reading changes.
    pub batch_size: u32,
    /// Bound on push/pull rounds per run.
    pub max_rounds: u32,
}

impl SyncConfig {
    /// Configuration for `peer_url` with default settings.
    pub fn new(peer_url: &str, secret: &str) -> Self {
        Self {
            peer_url: peer_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            tls_client_cert: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route requests through `proxy`.
    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    /// Present the client certificate stored at `path`.
    pub fn with_tls_client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_client_cert = Some(path.into());
        self
    }

    /// Set the changed-feed page size, between 1 and the peer's page cap.
    ///
    /// A page shorter than the requested size ends the pull.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_CHANGES_PER_PAGE);
        self
    }

    /// Set the bound on rounds per run (at least 1).
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("peer_url", &self.peer_url)
            .field("secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("proxy", &self.proxy)
            .field("tls_client_cert", &self.tls_client_cert)
            .field("batch_size", &self.batch_size)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}
