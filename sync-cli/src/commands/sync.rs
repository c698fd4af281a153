//! One-shot sync and force-full-sync.

use anyhow::{bail, Context, Result};
use sync_client::{HttpTransport, SyncEngine, SyncOutcome, Transport};
use sync_core::HashCheck;
use sync_server::Config;

use crate::config::Replica;

/// Build an engine for the `[sync]` peer in `config`.
pub fn engine(config: &Config, replica: &Replica) -> Result<SyncEngine<HttpTransport>> {
    let Some(peer) = &config.sync else {
        bail!("No [sync] peer configured");
    };
    let sync_config = peer.sync_config(&config.document.secret);
    let transport = HttpTransport::new(&sync_config)
        .with_context(|| format!("building transport for {}", sync_config.peer_url))?;
    Ok(SyncEngine::new(
        replica.store.clone(),
        replica.sources.clone(),
        transport,
        sync_config,
    ))
}

/// Run one exchange and report it.
pub async fn run<T: Transport>(engine: &SyncEngine<T>) -> Result<SyncOutcome> {
    let outcome = engine.run_once().await;
    match &outcome {
        SyncOutcome::Completed {
            rounds,
            pushed,
            pulled,
            hash_check,
        } => {
            println!("Sync completed in {rounds} round(s)");
            println!("  Pushed: {pushed}");
            println!("  Pulled: {pulled}");
            match hash_check {
                HashCheck::Matched => println!("  Hashes: match"),
                HashCheck::Mismatched(kinds) => {
                    let kinds: Vec<_> = kinds.iter().map(|k| k.as_str()).collect();
                    println!("  Hashes: MISMATCH for {}", kinds.join(", "));
                }
                HashCheck::Skipped => println!("  Hashes: not checked, changes still outstanding"),
            }
        }
        SyncOutcome::Skipped => println!("Sync already in progress, nothing done"),
        SyncOutcome::Failed { reason } => bail!("Sync failed: {reason}"),
    }
    Ok(outcome)
}

/// Reset both cursors so the next sync exchanges everything.
pub async fn force_full<T: Transport>(engine: &SyncEngine<T>) -> Result<()> {
    engine.force_full_sync().await?;
    println!("Cursors reset; the next sync exchanges the full changelog");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_client::{FailureReason, MockTransport, SyncConfig};
    use sync_core::Direction;
    use sync_store::{load_cursors, persist_cursor, EntityStore, SqliteStore};
    use sync_types::{ChangeId, OriginId};

    async fn replica() -> Replica {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        Replica::from_store(store).await.unwrap()
    }

    async fn mock_engine(replica: &Replica) -> SyncEngine<MockTransport> {
        let transport = MockTransport::new(OriginId::from_string("the-peer-001").unwrap());
        transport.set_hashes(replica.store.content_hashes().await.unwrap());
        SyncEngine::new(
            replica.store.clone(),
            replica.sources.clone(),
            transport,
            SyncConfig::new("http://peer.invalid", "secret"),
        )
    }

    #[tokio::test]
    async fn engine_needs_a_peer() {
        let config = Config::with_secret("secret");
        let replica = replica().await;

        let err = engine(&config, &replica).err().unwrap();
        assert!(err.to_string().contains("[sync]"));
    }

    #[tokio::test]
    async fn completed_run_is_reported() {
        let replica = replica().await;
        let engine = mock_engine(&replica).await;

        let outcome = run(&engine).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Completed {
                hash_check: HashCheck::Matched,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_run_is_an_error() {
        let replica = replica().await;
        let engine = mock_engine(&replica).await;
        engine
            .transport()
            .fail_next_login(FailureReason::ConnectionRefused("refused".into()));

        let err = run(&engine).await.unwrap_err();
        assert!(err.to_string().starts_with("Sync failed"));
    }

    #[tokio::test]
    async fn force_full_resets_cursors() {
        let replica = replica().await;
        let engine = mock_engine(&replica).await;
        persist_cursor(replica.store.as_ref(), Direction::Pull, ChangeId::new(7))
            .await
            .unwrap();

        force_full(&engine).await.unwrap();

        let cursors = load_cursors(replica.store.as_ref()).await.unwrap();
        assert_eq!(cursors.get(Direction::Pull), ChangeId::zero());
    }
}
