//! Error types for icebox

use crate::remote::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for icebox operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Archive not found in index: {name}")]
    ArchiveNotFound { name: String },

    #[error("Archive already marked as uploaded: {name}")]
    AlreadyUploaded { name: String },

    #[error("Archive already exists: {path}")]
    ArchiveExists { path: PathBuf },

    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Could not retrieve index <{key}>: {source}")]
    IndexPull {
        key: String,
        #[source]
        source: TransportError,
    },

    #[error("Upload of <{archive}> failed: {source}")]
    Upload {
        archive: String,
        #[source]
        source: TransportError,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl Error {
    /// Whether the failure is confined to the folder being processed.
    /// Index transport and database failures are not.
    pub fn is_folder_local(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Walkdir(_) | Error::ArchiveExists { .. } | Error::Upload { .. }
        )
    }
}

/// Result type alias for icebox operations
pub type Result<T> = std::result::Result<T, Error>;
