//! Show replica status.

use anyhow::Result;
use sync_core::{Direction, SyncCursors};
use sync_types::{ChangeId, OriginId};

use crate::config::Replica;

/// What `treesync status` prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub origin_id: OriginId,
    pub known_origins: usize,
    pub cursors: SyncCursors,
    pub max_change_id: ChangeId,
    pub outstanding_pushes: u64,
}

/// Gather status from the local store.
pub async fn gather(replica: &Replica) -> Result<Status> {
    let store = replica.store.as_ref();
    let cursors = sync_store::load_cursors(store).await?;
    Ok(Status {
        origin_id: replica.sources.current_origin_id().clone(),
        known_origins: store.known_origins().await?.len(),
        cursors,
        max_change_id: store.max_change_id().await?,
        outstanding_pushes: store
            .count_changes_after(cursors.get(Direction::Push))
            .await?,
    })
}

/// Run the status command.
pub async fn run(replica: &Replica) -> Result<()> {
    let status = gather(replica).await?;

    println!("=== treesync status ===");
    println!();
    println!("Replica:");
    println!("  Origin:        {}", status.origin_id);
    println!("  Known origins: {}", status.known_origins);
    println!("  Changelog max: {}", status.max_change_id);
    println!();
    println!("Cursors:");
    println!("  Last pushed:   {}", status.cursors.get(Direction::Push));
    println!("  Last pulled:   {}", status.cursors.get(Direction::Pull));
    println!("  Outstanding:   {} to push", status.outstanding_pushes);

    Ok(())
}
