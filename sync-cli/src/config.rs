//! Configuration and store loading for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_server::Config;
use sync_store::{EntityStore, SourceRegistry, SqliteStore};

/// Default config file: `treesync.toml` in the platform config directory.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "treesync")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join("treesync.toml"))
}

/// Load the replica configuration shared with `treesync-server`.
pub fn load(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// An opened replica: its store and origin registry.
pub struct Replica {
    pub store: Arc<dyn EntityStore>,
    pub sources: SourceRegistry,
}

impl Replica {
    /// Open the database named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::new(&config.storage.database)
            .await
            .with_context(|| format!("opening {}", config.storage.database.display()))?;
        Self::from_store(Arc::new(store)).await
    }

    /// Wrap an already opened store.
    pub async fn from_store(store: Arc<dyn EntityStore>) -> Result<Self> {
        let sources = SourceRegistry::open(store.as_ref())
            .await
            .context("loading origin registry")?;
        Ok(Self { store, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_path_names_the_toml_file() {
        let path = default_config_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "treesync.toml");
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        let err = load(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }

    #[tokio::test]
    async fn open_creates_the_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("treesync.toml");
        let database = dir.path().join("replica.db");
        std::fs::write(
            &path,
            format!(
                "[storage]\ndatabase = {:?}\n\n[http]\n\n[document]\nsecret = \"s\"\n\n[checks]\n",
                database.display().to_string()
            ),
        )
        .unwrap();

        let config = load(&path).unwrap();
        let replica = Replica::open(&config).await.unwrap();

        assert!(database.exists());
        assert_eq!(replica.sources.current_origin_id().as_str().len(), 12);
    }
}
