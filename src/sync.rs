//! Mirroring the version index to the remote index store.
//!
//! The remote copy is a single blob under a fixed key, replaced wholesale
//! on every push. There is no locking: one writer at a time is assumed.

use crate::index::VersionIndex;
use crate::remote::{RemoteIndexStore, TransportError};
use crate::retry::{backoff_sleep, retry_transport, RetryPolicy};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument, Span};

/// Default key of the index blob
pub const DEFAULT_INDEX_KEY: &str = "icebox-index.db";

/// Result of making sure a remote resource exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    /// It was already there
    Existing,
    /// It was created by this call
    Created,
    /// Creation failed transiently; the run goes on and the next real
    /// operation decides
    Deferred,
}

/// Pulls and pushes the version index
pub struct RemoteIndexSync {
    store: Arc<dyn RemoteIndexStore>,
    container: String,
    locality: String,
    key: String,
    retry: RetryPolicy,
    span: Span,
}

impl RemoteIndexSync {
    pub fn new(
        store: Arc<dyn RemoteIndexStore>,
        container: impl Into<String>,
        locality: impl Into<String>,
        parent: &Span,
    ) -> Self {
        let container = container.into();
        let span = tracing::info_span!(parent: parent, "index_sync", container = %container);
        Self {
            store,
            container,
            locality: locality.into(),
            key: DEFAULT_INDEX_KEY.to_string(),
            retry: RetryPolicy::default(),
            span,
        }
    }

    /// Use a different blob key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Make sure the container exists, creating it if needed and waiting
    /// until the store reports it.
    pub async fn ensure_container(&self) -> Result<Bootstrap> {
        self.bootstrap().instrument(self.span.clone()).await
    }

    async fn bootstrap(&self) -> Result<Bootstrap> {
        let exists = retry_transport(&self.retry, "container lookup", || {
            self.store.exists(&self.container)
        })
        .await
        .map_err(|source| Error::Transport {
            op: "container lookup",
            source,
        })?;

        if exists {
            info!("Using container <{}>", self.container);
            return Ok(Bootstrap::Existing);
        }

        info!(
            "Could not find container <{}> in <{}>, creating it",
            self.container, self.locality
        );
        match self.store.create(&self.container, &self.locality).await {
            Ok(()) => {}
            Err(TransportError::AlreadyExists) => return Ok(Bootstrap::Existing),
            Err(e) if e.is_retryable() => {
                error!("Could not create container <{}>: {}", self.container, e);
                return Ok(Bootstrap::Deferred);
            }
            Err(source) => {
                return Err(Error::Transport {
                    op: "container creation",
                    source,
                })
            }
        }

        self.wait_until_exists().await?;
        info!("Created container <{}>", self.container);
        Ok(Bootstrap::Created)
    }

    async fn wait_until_exists(&self) -> Result<()> {
        let polls = self.retry.max_retries.max(1) * 4;
        for attempt in 0..polls {
            match self.store.exists(&self.container).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_retryable() => warn!("Container lookup failed, retrying: {}", e),
                Err(source) => {
                    return Err(Error::Transport {
                        op: "container lookup",
                        source,
                    })
                }
            }
            backoff_sleep(&self.retry, attempt).await;
        }

        Err(Error::Transport {
            op: "container creation",
            source: TransportError::Transient(format!(
                "container <{}> not visible after {} checks",
                self.container, polls
            )),
        })
    }

    /// Download the index into `scratch` and open it.
    ///
    /// A missing blob is the first-run case and yields an empty index. Any
    /// other failure aborts: carrying on with an empty index would make
    /// every folder look new.
    pub async fn pull(&self, scratch: &Path) -> Result<VersionIndex> {
        self.download(scratch).instrument(self.span.clone()).await
    }

    async fn download(&self, scratch: &Path) -> Result<VersionIndex> {
        let local_path = self.local_path(scratch);

        let blob = retry_transport(&self.retry, "index download", || {
            self.store.get(&self.container, &self.key)
        })
        .await;

        match blob {
            Ok(Some(bytes)) => {
                tokio::fs::write(&local_path, &bytes).await?;
                info!("Retrieved index <{}> ({} bytes)", self.key, bytes.len());
            }
            Ok(None) | Err(TransportError::NotFound) => {
                warn!("Could not find index <{}> in container. Will create a new one", self.key);
            }
            Err(source) => {
                error!("Error retrieving index <{}>: {}", self.key, source);
                return Err(Error::IndexPull {
                    key: self.key.clone(),
                    source,
                });
            }
        }

        VersionIndex::open(&local_path)
    }

    /// Flush `index` and replace the remote copy with it
    pub async fn push(&self, index: &VersionIndex) -> Result<()> {
        index.flush()?;
        let bytes = tokio::fs::read(index.path())
            .await
            .map_err(|e| Error::Transport {
                op: "index upload",
                source: TransportError::from_io(&e),
            })?;
        self.upload(bytes).instrument(self.span.clone()).await
    }

    async fn upload(&self, bytes: Vec<u8>) -> Result<()> {
        let size = bytes.len();
        retry_transport(&self.retry, "index upload", || {
            self.store.put(&self.container, &self.key, bytes.clone())
        })
        .await
        .map_err(|source| Error::Transport {
            op: "index upload",
            source,
        })?;

        info!("Pushed index <{}> ({} bytes)", self.key, size);
        Ok(())
    }

    fn local_path(&self, scratch: &Path) -> PathBuf {
        scratch.join(&self.key)
    }
}
