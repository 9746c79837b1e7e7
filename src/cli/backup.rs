//! Backup command implementation.

use super::{local_transports, StoreArgs};
use crate::config::IceboxConfig;
use crate::orchestrator::{BackupOrchestrator, FolderOutcome};
use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments for the backup command
#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Vault where archives are stored; created if it doesn't exist
    #[arg(long)]
    pub vault: Option<String>,

    /// The folder to scan for changes and back up
    #[arg(long)]
    pub root_folder: Option<PathBuf>,

    /// Stop after working on this many folders
    #[arg(long)]
    pub limit: Option<usize>,
}

impl BackupArgs {
    fn into_config(self, config_path: Option<&Path>) -> anyhow::Result<IceboxConfig> {
        let mut config = IceboxConfig::load(config_path)?;
        self.store.apply(&mut config);
        if let Some(vault) = self.vault {
            config.vault = vault;
        }
        if let Some(root_folder) = self.root_folder {
            config.root_folder = root_folder;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run the backup command
pub async fn run(args: BackupArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = args.into_config(config_path)?;
    let (store, vault) = local_transports(&config.store_root);

    println!("Starting backup of {}", config.root_folder.display());
    let orchestrator = BackupOrchestrator::new(&config, Arc::new(store), Arc::new(vault))?;
    let report = orchestrator.run().await.context("backup run aborted")?;

    for outcome in &report.outcomes {
        match outcome {
            FolderOutcome::Skipped { folder, .. } => println!("  = {folder} (unchanged)"),
            FolderOutcome::Archived { folder, archive, external_id } => {
                println!("  + {folder} -> {archive} [{external_id}]")
            }
            FolderOutcome::Resumed { folder, archive, external_id } => {
                println!("  ~ {folder} -> {archive} [{external_id}] (resumed)")
            }
            FolderOutcome::Failed { folder, reason } => println!("  ! {folder}: {reason}"),
        }
    }

    println!(
        "Backup completed: {} archived, {} resumed, {} unchanged, {} failed",
        report.archived(),
        report.resumed(),
        report.skipped(),
        report.failed()
    );
    if report.limit_reached {
        println!("Limit reached; remaining folders will be handled by the next run.");
    }

    if report.failed() > 0 {
        anyhow::bail!("{} folder(s) could not be backed up", report.failed());
    }
    Ok(())
}
