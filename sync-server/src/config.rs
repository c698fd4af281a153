//! Configuration loading for treesync-server.
//!
//! Configuration is loaded from a TOML file (default: `treesync.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use sync_client::{Schedule, SyncConfig};

/// Root configuration for treesync-server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Document shared by every replica.
    pub document: DocumentConfig,
    /// Peer to sync with. Without it the replica only serves.
    #[serde(default)]
    pub sync: Option<PeerConfig>,
    /// Consistency check configuration.
    pub checks: ChecksConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Lifetime of a login session in seconds (default: 3600).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Document configuration.
#[derive(Clone, Deserialize)]
pub struct DocumentConfig {
    /// Shared secret signing every login.
    pub secret: String,
}

impl std::fmt::Debug for DocumentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Outbound sync configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Base URL of the peer.
    pub peer_url: String,
    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Optional outbound proxy URL.
    pub proxy: Option<String>,
    /// Optional PEM file with a TLS client certificate and key.
    pub tls_client_cert: Option<PathBuf>,
    /// Sync interval in seconds (default: 60).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    /// Delay before the first sync in seconds (default: 5).
    #[serde(default = "default_sync_initial_delay")]
    pub initial_delay_secs: u64,
    /// Changed-feed page size (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Push/pull rounds per run (default: 3).
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

/// Consistency check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChecksConfig {
    /// Enable periodic checks (default: true).
    #[serde(default = "default_checks_enabled")]
    pub enabled: bool,
    /// Check interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_checks_interval")]
    pub interval_secs: u64,
    /// Delay before the first check in seconds (default: 10).
    #[serde(default = "default_checks_initial_delay")]
    pub initial_delay_secs: u64,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("treesync.db")
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

fn default_sync_interval() -> u64 {
    60
}

fn default_sync_initial_delay() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    sync_types::MAX_CHANGES_PER_PAGE
}

fn default_max_rounds() -> u32 {
    3
}

fn default_checks_enabled() -> bool {
    true
}

fn default_checks_interval() -> u64 {
    3600 // 1 hour
}

fn default_checks_initial_delay() -> u64 {
    10
}

impl Config {
    /// Default configuration around a document secret.
    pub fn with_secret(secret: &str) -> Self {
        Self {
            storage: StorageConfig {
                database: default_database_path(),
            },
            http: HttpConfig {
                bind_address: default_http_bind(),
                session_ttl_secs: default_session_ttl(),
                metrics_enabled: default_metrics_enabled(),
            },
            document: DocumentConfig {
                secret: secret.to_string(),
            },
            sync: None,
            checks: ChecksConfig {
                enabled: default_checks_enabled(),
                interval_secs: default_checks_interval(),
                initial_delay_secs: default_checks_initial_delay(),
            },
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the timers and sessions cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.document.secret.is_empty() {
            return Err(ConfigError::Invalid("document.secret must not be empty".into()));
        }
        if self.http.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid("http.session_ttl_secs must be positive".into()));
        }
        if self.checks.interval_secs == 0 {
            return Err(ConfigError::Invalid("checks.interval_secs must be positive".into()));
        }
        if let Some(peer) = &self.sync {
            if peer.interval_secs == 0 {
                return Err(ConfigError::Invalid("sync.interval_secs must be positive".into()));
            }
            if peer.batch_size == 0 || peer.batch_size > sync_types::MAX_CHANGES_PER_PAGE {
                return Err(ConfigError::Invalid(format!(
                    "sync.batch_size must be between 1 and {}",
                    sync_types::MAX_CHANGES_PER_PAGE
                )));
            }
            if peer.timeout_secs == 0 {
                return Err(ConfigError::Invalid("sync.timeout_secs must be positive".into()));
            }
        }
        Ok(())
    }

    /// Lifetime of a login session.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.http.session_ttl_secs)
    }
}

impl PeerConfig {
    /// Engine settings for this peer.
    pub fn sync_config(&self, secret: &str) -> SyncConfig {
        let mut config = SyncConfig::new(&self.peer_url, secret)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_batch_size(self.batch_size)
            .with_max_rounds(self.max_rounds);
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy);
        }
        if let Some(cert) = &self.tls_client_cert {
            config = config.with_tls_client_cert(cert.clone());
        }
        config
    }

    /// Sync timer schedule.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            enabled: true,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

impl ChecksConfig {
    /// Consistency timer schedule.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            enabled: self.enabled,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
