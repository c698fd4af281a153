//! Self-echo suppression.
//!
//! Every boot mints a new [`OriginId`]; every change a replica produces is
//! stamped with it. Changes coming back from a peer whose source is any
//! origin this replica has ever used are its own writes and are skipped.

use std::collections::BTreeSet;
use sync_types::OriginId;

/// The current origin of this process plus every historical one.
#[derive(Debug, Clone)]
pub struct OriginRegistry {
    current: OriginId,
    known: BTreeSet<OriginId>,
}

impl OriginRegistry {
    /// Build from the current origin and the persisted history.
    pub fn new(current: OriginId, historical: impl IntoIterator<Item = OriginId>) -> Self {
        let mut known: BTreeSet<OriginId> = historical.into_iter().collect();
        known.insert(current.clone());
        Self { current, known }
    }

    /// Origin stamped on changes produced by this process.
    pub fn current(&self) -> &OriginId {
        &self.current
    }

    /// Whether `origin` is this replica, now or in any earlier boot.
    pub fn is_local(&self, origin: &OriginId) -> bool {
        self.known.contains(origin)
    }

    /// Number of origins this replica has used.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Always false: the current origin is always known.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
