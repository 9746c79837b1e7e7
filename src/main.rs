//! icebox - incremental folder backup to cold storage
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use icebox::cli::{Cli, Commands};
use icebox::logging::{init_file_logging, init_logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => init_file_logging(path, cli.verbose)?,
        None => init_logging(cli.verbose)?,
    }

    match cli.command {
        Commands::Backup(args) => icebox::cli::backup::run(args, cli.config.as_deref()).await,
        Commands::History(args) => icebox::cli::history::run(args, cli.config.as_deref()).await,
    }
}
