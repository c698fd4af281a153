//! Cursor persistence in the settings table.

use sync_core::{Direction, SyncCursors};
use sync_types::{ChangeId, SyncError};

use crate::error::{StorageError, StorageResult};
use crate::EntityStore;

/// Load both cursors, zero for any never written.
pub async fn load_cursors<S: EntityStore + ?Sized>(store: &S) -> StorageResult<SyncCursors> {
    Ok(SyncCursors::new(
        load(store, Direction::Push).await?,
        load(store, Direction::Pull).await?,
    ))
}

/// Persist one cursor.
pub async fn persist_cursor<S: EntityStore + ?Sized>(
    store: &S,
    direction: Direction,
    id: ChangeId,
) -> StorageResult<()> {
    store
        .set_setting(direction.setting_name(), &id.value().to_string())
        .await
}

/// Reset both cursors to zero, forcing the next run to exchange everything.
pub async fn reset_cursors<S: EntityStore + ?Sized>(store: &S) -> StorageResult<()> {
    for direction in [Direction::Push, Direction::Pull] {
        persist_cursor(store, direction, ChangeId::zero()).await?;
    }
    tracing::info!("Sync cursors reset, next run is a full sync");
    Ok(())
}

async fn load<S: EntityStore + ?Sized>(store: &S, direction: Direction) -> StorageResult<ChangeId> {
    match store.get_setting(direction.setting_name()).await? {
        None => Ok(ChangeId::zero()),
        Some(raw) => raw.trim().parse::<u64>().map(ChangeId::new).map_err(|_| {
            StorageError::Payload(SyncError::InvalidData(format!(
                "{} is not a change id: {raw:?}",
                direction.setting_name()
            )))
        }),
    }
}
