//! # treesync
//!
//! Admin CLI for a treesync replica. Reads the same TOML configuration as
//! `treesync-server`.
//!
//! ## Commands
//!
//! - `status`: Show origin, cursors and outstanding changes
//! - `sync`: Run one exchange with the configured peer
//! - `check`: Run the consistency checker once
//! - `force-full-sync`: Reset both cursors
//! - `fill-changes`: Create changelog entries for entities without one
//! - `purge-changes`: Drop changelog entries of vanished entities
//!
//! ## Example
//!
//! ```bash
//! treesync --config ./treesync.toml status
//! treesync sync
//! treesync check
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{changelog, check, status, sync};
use config::Replica;

/// Admin CLI for a treesync replica.
#[derive(Parser, Debug)]
#[command(name = "treesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: treesync.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Show replica status
    Status,

    /// Run one sync exchange with the configured peer
    Sync,

    /// Run the consistency checker once
    Check,

    /// Reset both cursors so the next sync exchanges everything
    ForceFullSync,

    /// Create changelog entries for entities that have none
    FillChanges,

    /// Delete changelog entries whose entity no longer exists
    PurgeChanges,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let config = config::load(&config_path)?;
    let replica = Replica::open(&config).await?;

    match cli.command {
        Commands::Status => status::run(&replica).await?,
        Commands::Sync => {
            let engine = sync::engine(&config, &replica)?;
            sync::run(&engine).await?;
        }
        Commands::Check => {
            let report = check::run(&replica).await?;
            if !report.is_clean() {
                anyhow::bail!("{} consistency violation(s)", report.violations.len());
            }
        }
        Commands::ForceFullSync => {
            let engine = sync::engine(&config, &replica)?;
            sync::force_full(&engine).await?;
        }
        Commands::FillChanges => {
            changelog::fill(&replica).await?;
        }
        Commands::PurgeChanges => {
            changelog::purge(&replica).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_global_config() {
        let cli = Cli::try_parse_from(["treesync", "sync", "--config", "/tmp/t.toml"]).unwrap();
        assert_eq!(cli.command, Commands::Sync);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));

        let cli = Cli::try_parse_from(["treesync", "force-full-sync"]).unwrap();
        assert_eq!(cli.command, Commands::ForceFullSync);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(Cli::try_parse_from(["treesync", "pair"]).is_err());
        assert!(Cli::try_parse_from(["treesync"]).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
