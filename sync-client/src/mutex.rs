//! Exclusive access between sync runs and consistency checks.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Single-permit lock shared by the sync engine and the consistency checker.
///
/// A sync run that finds the lock taken is dropped ([`SyncMutex::try_lock`]);
/// a consistency check waits for it ([`SyncMutex::lock`]). The permit is
/// released when the guard drops, on every exit path.
#[derive(Debug, Clone, Default)]
pub struct SyncMutex {
    inner: Arc<Mutex<()>>,
}

/// Held while a sync run or check is in progress.
#[derive(Debug)]
pub struct SyncGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SyncMutex {
    /// A free lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free.
    pub fn try_lock(&self) -> Option<SyncGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| SyncGuard { _guard: guard })
    }

    /// Wait for the lock.
    pub async fn lock(&self) -> SyncGuard {
        SyncGuard {
            _guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Whether someone currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
