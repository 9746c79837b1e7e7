//! Boundary services the backup engine talks to.
//!
//! The engine never depends on a concrete transport. It sees a
//! [`RemoteIndexStore`] holding the single serialized index blob, and a
//! [`ColdVault`] accepting write-once archive uploads. Every call reports
//! an explicit [`TransportError`] so callers can tell an expected
//! condition (missing blob, existing container) from a transient or a
//! fatal failure.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod local;
pub mod memory;

pub use local::{LocalIndexStore, LocalVault};
pub use memory::{MemoryIndexStore, MemoryVault};

/// Outcome of a failed call to a boundary service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }

    /// Classify a local I/O error the way a network transport would
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => TransportError::NotFound,
            ErrorKind::AlreadyExists => TransportError::AlreadyExists,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => TransportError::Transient(err.to_string()),
            _ => TransportError::Fatal(err.to_string()),
        }
    }
}

/// Result type for boundary service calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Blob storage holding the serialized version index
#[async_trait]
pub trait RemoteIndexStore: Send + Sync {
    /// Whether the container exists
    async fn exists(&self, container: &str) -> TransportResult<bool>;

    /// Create a container pinned to the given locality
    async fn create(&self, container: &str, locality: &str) -> TransportResult<()>;

    /// Fetch a blob; `Ok(None)` when the key is absent
    async fn get(&self, container: &str, key: &str) -> TransportResult<Option<Vec<u8>>>;

    /// Store a blob, overwriting any previous value
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> TransportResult<()>;
}

/// Write-once archival storage
#[async_trait]
pub trait ColdVault: Send + Sync {
    /// Create the vault; reports `AlreadyExists` when it is already there
    async fn create_vault(&self, vault: &str) -> TransportResult<()>;

    /// Stream an archive file into the vault and return the identifier the
    /// vault assigned to it
    async fn upload(&self, vault: &str, archive: &Path) -> TransportResult<String>;
}
