//! Command-line interface for icebox.
//!
//! Settings can come from a YAML config file; every flag given on the
//! command line overrides the file.

use crate::config::IceboxConfig;
use crate::remote::{LocalIndexStore, LocalVault};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod backup;
pub mod history;

/// icebox - incremental folder backup to cold storage
#[derive(Parser)]
#[command(name = "icebox")]
#[command(about = "Backup a hierarchy of folders, with one-level granularity. When a folder \
                   already exists but has been modified, a new version is uploaded alongside \
                   the existing ones.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to <config dir>/icebox/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Back up every new or changed folder under the root folder
    Backup(backup::BackupArgs),
    /// Show the recorded version history
    History(history::HistoryArgs),
}

/// Where the version index lives
#[derive(Args, Debug, Default)]
pub struct StoreArgs {
    /// Region of the index container; it is created there if missing
    #[arg(long)]
    pub region: Option<String>,

    /// Container holding the index; created if it doesn't exist
    #[arg(long)]
    pub bucket: Option<String>,

    /// Directory backing the index store and the vaults
    #[arg(long)]
    pub store_root: Option<PathBuf>,
}

impl StoreArgs {
    pub(crate) fn apply(self, config: &mut IceboxConfig) {
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(bucket) = self.bucket {
            config.bucket = bucket;
        }
        if let Some(store_root) = self.store_root {
            config.store_root = store_root;
        }
    }
}

/// Filesystem transports rooted at the configured store directory
pub(crate) fn local_transports(store_root: &Path) -> (LocalIndexStore, LocalVault) {
    (
        LocalIndexStore::new(store_root.join("index")),
        LocalVault::new(store_root.join("vaults")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_backup_flags_parse() {
        let cli = Cli::parse_from([
            "icebox",
            "backup",
            "--region",
            "eu-central-1",
            "--bucket",
            "metadata",
            "--vault",
            "photos",
            "--root-folder",
            "/srv/photos",
            "--limit",
            "1",
        ]);

        match cli.command {
            Commands::Backup(args) => {
                assert_eq!(args.store.region.as_deref(), Some("eu-central-1"));
                assert_eq!(args.vault.as_deref(), Some("photos"));
                assert_eq!(args.limit, Some(1));
            }
            Commands::History(_) => panic!("wrong command"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = IceboxConfig {
            region: "us-east-1".to_string(),
            bucket: "from-file".to_string(),
            ..IceboxConfig::default()
        };
        StoreArgs {
            region: None,
            bucket: Some("from-flag".to_string()),
            store_root: None,
        }
        .apply(&mut config);

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.bucket, "from-flag");
    }
}
