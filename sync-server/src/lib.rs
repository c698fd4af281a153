//! # sync-server
//!
//! The peer side of treesync, plus the replica daemon.
//!
//! This crate implements a server that:
//! - Verifies logins signed with the shared document secret
//! - Serves the local changelog and entity payloads to syncing replicas
//! - Applies pushed entities through last-write-wins resolution
//! - Reports per-kind content hashes for the post-sync check
//! - Optionally syncs with its own peer and runs consistency checks on timers
//!
//! ## Architecture
//!
//! ```text
//! Replica X ──┐                      ┌── Replica Y
//!             │   HTTP JSON /sync/*  │
//!             ├─────────────────────►│
//!             │                      │
//!         ┌───┴──────────────────────┴───┐
//!         │        treesync-server       │
//!         │  ┌────────────────────────┐  │
//!         │  │ SQLite (entities, log) │  │
//!         │  └────────────────────────┘  │
//!         └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! - `POST /sync/login` → origin id, changelog head and session token
//! - `GET /sync/changed?since=&limit=` → changelog entries after a cursor
//! - `GET /sync/:kind/:id` → entity payload, 404 once gone
//! - `PUT /sync/:kind` → apply a pushed entity (null erases)
//! - `GET /sync/check` → `maxSyncId` and content hashes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use http::build_router;
pub use server::{ServerMetrics, SyncServer};
