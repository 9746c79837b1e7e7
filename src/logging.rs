//! Process-wide tracing subscriber setup.

use crate::{Error, Result};
use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "icebox=debug" } else { "icebox=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn already_installed(e: impl std::fmt::Display) -> Error {
    Error::Config {
        reason: format!("Could not install logger: {}", e),
    }
}

/// Log to stderr
pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(already_installed)
}

/// Append to `log_file` without colors
pub fn init_file_logging(log_file: &Path, verbose: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(file)
        .with_ansi(false)
        .try_init()
        .map_err(already_installed)
}
