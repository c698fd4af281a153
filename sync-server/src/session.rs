//! Login sessions.
//!
//! A successful login hands out an opaque token; every other `/sync/*`
//! request must present it in the `x-sync-session` header until it expires.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Live session tokens and their expiry.
#[derive(Debug)]
pub struct SessionTable {
    ttl: Duration,
    sessions: DashMap<String, Instant>,
}

impl SessionTable {
    /// Empty table whose sessions live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
        }
    }

    /// Open a session and return its token.
    pub fn issue(&self) -> String {
        self.purge_expired();

        let token = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    /// Whether `token` names a live session. Expired sessions are dropped.
    pub fn validate(&self, token: &str) -> bool {
        let now = Instant::now();
        match self.sessions.get(token).map(|expiry| *expiry) {
            Some(expiry) if expiry > now => true,
            Some(_) => {
                self.sessions.remove(token);
                false
            }
            None => false,
        }
    }

    /// Drop every expired session, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, expiry| *expiry > now);
        before - self.sessions.len()
    }

    /// Number of sessions held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is held.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
