//! Filesystem-backed boundary services.
//!
//! Containers and vaults are sub-directories of a root directory, which
//! can live on a mounted drive or a synced folder. Puts are atomic: data
//! goes to a temporary sibling first and is renamed into place, so a
//! reader never sees a partially written index.

use super::{ColdVault, RemoteIndexStore, TransportError, TransportResult};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Marker file recording the locality a container was created with
const LOCALITY_MARKER: &str = ".locality";

/// Reject names that could escape the root directory
fn validate_name(name: &str) -> TransportResult<()> {
    if name.is_empty() {
        return Err(TransportError::Fatal("unsafe storage name: empty".into()));
    }
    if name.starts_with('/') || name.contains('\\') {
        return Err(TransportError::Fatal(format!("unsafe storage name: '{name}'")));
    }
    let path = Path::new(name);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(TransportError::Fatal(format!("unsafe storage name: '{name}'")));
    }
    Ok(())
}

fn io_err(err: std::io::Error) -> TransportError {
    TransportError::from_io(&err)
}

/// Index store keeping each container as a directory of blobs
#[derive(Debug, Clone)]
pub struct LocalIndexStore {
    root: PathBuf,
}

impl LocalIndexStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn container_path(&self, container: &str) -> TransportResult<PathBuf> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, key: &str) -> TransportResult<PathBuf> {
        validate_name(key)?;
        Ok(self.container_path(container)?.join(key))
    }
}

#[async_trait]
impl RemoteIndexStore for LocalIndexStore {
    async fn exists(&self, container: &str) -> TransportResult<bool> {
        let path = self.container_path(container)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn create(&self, container: &str, locality: &str) -> TransportResult<()> {
        let path = self.container_path(container)?;
        fs::create_dir_all(&self.root).await.map_err(io_err)?;
        fs::create_dir(&path).await.map_err(io_err)?;
        fs::write(path.join(LOCALITY_MARKER), locality)
            .await
            .map_err(io_err)?;
        debug!("Created container directory {}", path.display());
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> TransportResult<Option<Vec<u8>>> {
        let path = self.blob_path(container, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let path = self.blob_path(container, key)?;
        let tmp = self
            .container_path(container)?
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        fs::write(&tmp, &bytes).await.map_err(io_err)?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

/// Vault storing each uploaded archive under a random identifier
#[derive(Debug, Clone)]
pub struct LocalVault {
    root: PathBuf,
}

impl LocalVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn vault_path(&self, vault: &str) -> TransportResult<PathBuf> {
        validate_name(vault)?;
        Ok(self.root.join(vault))
    }
}

#[async_trait]
impl ColdVault for LocalVault {
    async fn create_vault(&self, vault: &str) -> TransportResult<()> {
        let path = self.vault_path(vault)?;
        fs::create_dir_all(&self.root).await.map_err(io_err)?;
        fs::create_dir(&path).await.map_err(io_err)
    }

    async fn upload(&self, vault: &str, archive: &Path) -> TransportResult<String> {
        let vault_path = self.vault_path(vault)?;
        if !fs::try_exists(&vault_path).await.map_err(io_err)? {
            return Err(TransportError::Fatal(format!("vault <{vault}> does not exist")));
        }

        let id = Uuid::new_v4().simple().to_string();
        let destination = vault_path.join(&id);
        // Write-once: never replace an existing archive
        if fs::try_exists(&destination).await.map_err(io_err)? {
            return Err(TransportError::AlreadyExists);
        }
        fs::copy(archive, &destination).await.map_err(io_err)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_name_rejects_unsafe_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("/etc/passwd").is_err());
        assert!(validate_name("../outside").is_err());
        assert!(validate_name("a/../../b").is_err());
        assert!(validate_name("dir\\file").is_err());
        assert!(validate_name("index.db").is_ok());
    }

    #[tokio::test]
    async fn test_index_store_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(temp_dir.path().join("store"));

        assert!(!store.exists("bucket").await.unwrap());
        store.create("bucket", "eu-central-1").await.unwrap();
        assert!(store.exists("bucket").await.unwrap());
        assert_eq!(
            store.create("bucket", "eu-central-1").await,
            Err(TransportError::AlreadyExists)
        );

        assert_eq!(store.get("bucket", "index.db").await.unwrap(), None);
        store.put("bucket", "index.db", b"first".to_vec()).await.unwrap();
        store.put("bucket", "index.db", b"second".to_vec()).await.unwrap();
        assert_eq!(
            store.get("bucket", "index.db").await.unwrap(),
            Some(b"second".to_vec())
        );

        let marker =
            std::fs::read_to_string(temp_dir.path().join("store/bucket/.locality")).unwrap();
        assert_eq!(marker, "eu-central-1");
    }

    #[tokio::test]
    async fn test_put_into_missing_container_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(temp_dir.path());

        let result = store.put("missing", "index.db", b"data".to_vec()).await;
        assert_eq!(result, Err(TransportError::NotFound));
    }

    #[tokio::test]
    async fn test_vault_upload_assigns_distinct_ids() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("photos_AAAA.tar.gz");
        std::fs::write(&archive, b"archive bytes").unwrap();

        let vault = LocalVault::new(temp_dir.path().join("vaults"));
        vault.create_vault("photos").await.unwrap();
        assert_eq!(
            vault.create_vault("photos").await,
            Err(TransportError::AlreadyExists)
        );

        let first = vault.upload("photos", &archive).await.unwrap();
        let second = vault.upload("photos", &archive).await.unwrap();
        assert_ne!(first, second);

        let stored = std::fs::read(temp_dir.path().join("vaults/photos").join(&first)).unwrap();
        assert_eq!(stored, b"archive bytes");
    }

    #[tokio::test]
    async fn test_upload_to_missing_vault_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.tar.gz");
        std::fs::write(&archive, b"x").unwrap();

        let vault = LocalVault::new(temp_dir.path());
        let result = vault.upload("nope", &archive).await;
        assert!(matches!(result, Err(TransportError::Fatal(_))));
    }
}
