//! # icebox
//!
//! Incremental backup of a folder hierarchy to cold archival storage.
//!
//! Every immediate sub-folder of a root directory is hashed; folders whose
//! digest is not yet in their version history are archived, uploaded to a
//! write-once vault and recorded in a SQLite version index. The index is
//! mirrored as a single blob to a remote store after every folder, so an
//! interrupted run loses at most the folder in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use icebox::config::IceboxConfig;
//! use icebox::remote::{LocalIndexStore, LocalVault};
//! use icebox::BackupOrchestrator;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> icebox::Result<()> {
//! let config = IceboxConfig {
//!     region: "eu-central-1".into(),
//!     bucket: "photos-metadata".into(),
//!     vault: "photos".into(),
//!     root_folder: "/srv/photos".into(),
//!     ..IceboxConfig::default()
//! };
//! let store = Arc::new(LocalIndexStore::new("/mnt/backup/index"));
//! let vault = Arc::new(LocalVault::new("/mnt/backup/vaults"));
//!
//! let report = BackupOrchestrator::new(&config, store, vault)?.run().await?;
//! println!("{} folders archived", report.archived());
//! # Ok(())
//! # }
//! ```

pub mod archiver;
pub mod cli;
pub mod config;
pub mod error;
pub mod folder;
pub mod hasher;
pub mod index;
pub mod logging;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod sync;
pub mod vault;

// Re-export commonly used types
pub use error::{Error, Result};
pub use index::{Archive, VersionIndex};
pub use orchestrator::{BackupOrchestrator, FolderOutcome, RunReport};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
