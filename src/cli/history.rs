//! History command: inspect the version index.

use super::{local_transports, StoreArgs};
use crate::config::IceboxConfig;
use crate::index::Archive;
use crate::sync::RemoteIndexSync;
use clap::Args;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::Span;

/// Arguments for the history command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Only show this folder
    #[arg(long)]
    pub folder: Option<String>,

    /// Print JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

/// Run the history command
pub async fn run(args: HistoryArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = IceboxConfig::load(config_path)?;
    let folder = args.folder;
    let json = args.json;
    args.store.apply(&mut config);
    if config.bucket.is_empty() {
        anyhow::bail!("missing required setting: bucket");
    }

    let (store, _) = local_transports(&config.store_root);
    let sync = RemoteIndexSync::new(
        Arc::new(store),
        config.bucket.as_str(),
        config.region.as_str(),
        &Span::current(),
    )
    .with_key(config.index_key.as_str())
    .with_retry(config.retry.clone());

    let scratch = tempfile::Builder::new().prefix("icebox-").tempdir()?;
    let index = sync.pull(scratch.path()).await?;

    let folders = match folder {
        Some(name) => vec![name],
        None => index.folders()?,
    };
    let mut history: BTreeMap<String, Vec<Archive>> = BTreeMap::new();
    for name in folders {
        history.insert(name.clone(), index.history(&name)?);
    }
    index.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.values().all(|archives| archives.is_empty()) {
        println!("No versions recorded.");
        return Ok(());
    }

    for (folder, archives) in &history {
        println!("{folder}");
        for archive in archives {
            let status = match (&archive.external_id, archive.uploaded_at) {
                (Some(id), Some(at)) => {
                    format!("uploaded {} [{}]", at.format("%Y-%m-%d %H:%M"), id)
                }
                _ => "pending upload".to_string(),
            };
            println!(
                "  {}  {}  {}  {}",
                archive.created_at.format("%Y-%m-%d %H:%M"),
                archive.name,
                archive.checksum,
                status
            );
        }
    }

    Ok(())
}
