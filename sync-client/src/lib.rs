//! # sync-client
//!
//! The replica side of treesync: pushes local changes to one peer, pulls
//! the peer's changes back, and checks that both ended up identical.
//!
//! ## Features
//!
//! - **Sync engine**: drives the pure [`sync_core::SyncMachine`] through
//!   login, push, pull and hash check, with forward-only cursors
//! - **Transport abstraction**: HTTP peer (reqwest) or a scripted mock
//! - **Consistency checker**: periodic diagnostic pass over the local tree
//! - **Timers**: background tasks for both, sharing one lock
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{HttpTransport, SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::new("https://peer.example:8080", "document-secret");
//! let transport = HttpTransport::new(&config)?;
//! let engine = SyncEngine::new(store, sources, transport, config);
//!
//! let outcome = engine.run_once().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checker;
pub mod config;
pub mod engine;
pub mod error;
pub mod mutex;
pub mod scheduler;
pub mod transport;

pub use checker::ConsistencyChecker;
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncOutcome, SyncStats};
pub use error::{ProtocolMismatch, SyncFailure};
pub use mutex::{SyncGuard, SyncMutex};
pub use scheduler::{spawn_consistency_task, spawn_sync_task, Schedule};
pub use transport::{FailureReason, HttpTransport, MockTransport, Transport, TransportError};
