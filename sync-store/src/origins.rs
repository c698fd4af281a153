//! This replica's origin ids.

use sync_core::OriginRegistry;
use sync_types::OriginId;

use crate::error::StorageResult;
use crate::EntityStore;

/// The origin of this boot plus every origin persisted by earlier boots.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    registry: OriginRegistry,
}

impl SourceRegistry {
    /// Mint and persist a fresh origin for this boot, then load the history.
    pub async fn open<S: EntityStore + ?Sized>(store: &S) -> StorageResult<Self> {
        let current = OriginId::random();
        store.register_origin(&current).await?;
        let historical = store.known_origins().await?;

        tracing::info!(
            "Origin for this boot: {} ({} known)",
            current,
            historical.len()
        );

        Ok(Self {
            registry: OriginRegistry::new(current, historical),
        })
    }

    /// Origin stamped on every change this process produces.
    pub fn current_origin_id(&self) -> &OriginId {
        self.registry.current()
    }

    /// Whether `origin` was ever this replica.
    pub fn is_local_origin(&self, origin: &OriginId) -> bool {
        self.registry.is_local(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    #[tokio::test]
    async fn reopening_keeps_earlier_origins_local() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = SourceRegistry::open(&store).await.unwrap();
        let second = SourceRegistry::open(&store).await.unwrap();

        assert_ne!(first.current_origin_id(), second.current_origin_id());
        assert!(second.is_local_origin(first.current_origin_id()));
        assert!(second.is_local_origin(second.current_origin_id()));
        assert!(!second.is_local_origin(&OriginId::random()));
    }
}
