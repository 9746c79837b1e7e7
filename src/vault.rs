//! Uploading archives to the cold vault.

use crate::remote::{ColdVault, TransportError};
use crate::retry::{retry_transport, RetryPolicy};
use crate::sync::Bootstrap;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, Instrument, Span};

pub struct VaultUploader {
    vault: Arc<dyn ColdVault>,
    name: String,
    retry: RetryPolicy,
    span: Span,
}

impl VaultUploader {
    pub fn new(vault: Arc<dyn ColdVault>, name: impl Into<String>, parent: &Span) -> Self {
        let name = name.into();
        let span = tracing::info_span!(parent: parent, "vault", vault = %name);
        Self {
            vault,
            name,
            retry: RetryPolicy::default(),
            span,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create the vault unless it already exists
    pub async fn ensure_vault(&self) -> Result<Bootstrap> {
        let outcome = self.vault.create_vault(&self.name).instrument(self.span.clone()).await;
        let _enter = self.span.enter();

        match outcome {
            Ok(()) => {
                info!("Created vault <{}>", self.name);
                Ok(Bootstrap::Created)
            }
            Err(TransportError::AlreadyExists) => {
                info!("Using vault <{}>", self.name);
                Ok(Bootstrap::Existing)
            }
            Err(e) if e.is_retryable() => {
                error!("Could not retrieve/create vault <{}>: {}", self.name, e);
                Ok(Bootstrap::Deferred)
            }
            Err(source) => Err(Error::Transport {
                op: "vault creation",
                source,
            }),
        }
    }

    /// Upload `archive` and return the identifier the vault assigned.
    ///
    /// Transient failures are retried; anything left over is an
    /// [`Error::Upload`], never a silent missing identifier.
    pub async fn upload(&self, archive: &Path) -> Result<String> {
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());

        let result = async {
            info!("Uploading archive <{}>", archive_name);
            retry_transport(&self.retry, "archive upload", || {
                self.vault.upload(&self.name, archive)
            })
            .await
        }
        .instrument(self.span.clone())
        .await;

        let _enter = self.span.enter();
        match result {
            Ok(id) => {
                info!("Done uploading <{}>. External ID is <{}>", archive_name, id);
                Ok(id)
            }
            Err(source) => {
                error!("Upload of <{}> failed: {}", archive_name, source);
                Err(Error::Upload {
                    archive: archive_name,
                    source,
                })
            }
        }
    }
}
