//! Sync cursors for treesync.
//!
//! A replica keeps two cursors per peer relationship:
//! - `lastSyncedPush`: highest local changelog id already sent to the peer
//! - `lastSyncedPull`: highest peer changelog id already applied locally
//!
//! Both only move forward. They are persisted after every processed entry,
//! so an interrupted run resumes where it stopped.

use sync_types::ChangeId;

/// Which side of the exchange a cursor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local changes sent to the peer.
    Push,
    /// Peer changes applied locally.
    Pull,
}

impl Direction {
    /// Settings key under which the cursor is persisted.
    pub fn setting_name(&self) -> &'static str {
        match self {
            Direction::Push => "lastSyncedPush",
            Direction::Pull => "lastSyncedPull",
        }
    }
}

/// The push and pull cursors of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncCursors {
    push: ChangeId,
    pull: ChangeId,
}

impl SyncCursors {
    /// Cursors resumed from persisted values.
    pub fn new(push: ChangeId, pull: ChangeId) -> Self {
        Self { push, pull }
    }

    /// Current value of one cursor.
    pub fn get(&self, direction: Direction) -> ChangeId {
        match direction {
            Direction::Push => self.push,
            Direction::Pull => self.pull,
        }
    }

    /// Move a cursor forward to `id`.
    ///
    /// Returns `true` if the cursor moved (and must be persisted). Ids at
    /// or below the current value are ignored.
    pub fn advance(&mut self, direction: Direction, id: ChangeId) -> bool {
        let slot = match direction {
            Direction::Push => &mut self.push,
            Direction::Pull => &mut self.pull,
        };
        if id > *slot {
            *slot = id;
            true
        } else {
            false
        }
    }
}
