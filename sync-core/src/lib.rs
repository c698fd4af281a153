//! # sync-core
//!
//! Pure logic for treesync (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for changelog
//! replication without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sync-client` and
//! `sync-store`, which interpret the decisions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod consistency;
pub mod content_hash;
pub mod cursor;
pub mod origin;
pub mod resolver;
pub mod state;

pub use auth::{check_login, sign_login, LoginRejection};
pub use consistency::{ConsistencyReport, ConsistencyViolation, GraphSnapshot};
pub use content_hash::{compare_hashes, kind_hash, ContentHashes, HashMismatch};
pub use cursor::{Direction, SyncCursors};
pub use origin::OriginRegistry;
pub use resolver::{ConflictObserved, ConflictResolver, Resolution};
pub use state::{Action, Event, HashCheck, RunOutcome, SyncEvent, SyncMachine, SyncPhase};
