//! In-process boundary services.
//!
//! Both services keep everything in memory, count the calls made against
//! them and can be told to fail, which makes them the backing for dry runs
//! and for exercising the orchestrator's failure handling.

use super::{ColdVault, RemoteIndexStore, TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct StoreState {
    containers: HashMap<String, HashMap<String, Vec<u8>>>,
    localities: HashMap<String, String>,
    puts: usize,
    // Failure injection
    create_error: Option<TransportError>,
    get_error: Option<TransportError>,
    puts_before_failure: Option<usize>,
    invisible_polls: u32,
}

/// Index store living entirely in memory
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    state: Mutex<StoreState>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already has the given container
    pub fn with_container(container: &str) -> Self {
        let store = Self::new();
        lock(&store.state)
            .containers
            .insert(container.to_string(), HashMap::new());
        store
    }

    /// Make every `create` call fail with `error`
    pub fn fail_create(&self, error: TransportError) {
        lock(&self.state).create_error = Some(error);
    }

    /// Make every `get` call fail with `error`
    pub fn fail_get(&self, error: TransportError) {
        lock(&self.state).get_error = Some(error);
    }

    /// Allow `count` more successful puts, then fail the rest fatally
    pub fn fail_puts_after(&self, count: usize) {
        lock(&self.state).puts_before_failure = Some(count);
    }

    /// Report a freshly created container as missing for `polls` calls
    pub fn delay_visibility(&self, polls: u32) {
        lock(&self.state).invisible_polls = polls;
    }

    /// Number of successful puts
    pub fn put_count(&self) -> usize {
        lock(&self.state).puts
    }

    /// Locality a container was created with
    pub fn locality(&self, container: &str) -> Option<String> {
        lock(&self.state).localities.get(container).cloned()
    }

    /// Current value of a blob
    pub fn blob(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(key))
            .cloned()
    }

    /// Seed a blob directly
    pub fn insert_blob(&self, container: &str, key: &str, bytes: Vec<u8>) {
        lock(&self.state)
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl RemoteIndexStore for MemoryIndexStore {
    async fn exists(&self, container: &str) -> TransportResult<bool> {
        let mut state = lock(&self.state);
        if state.invisible_polls > 0 {
            state.invisible_polls -= 1;
            return Ok(false);
        }
        Ok(state.containers.contains_key(container))
    }

    async fn create(&self, container: &str, locality: &str) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.create_error.clone() {
            return Err(error);
        }
        if state.containers.contains_key(container) {
            return Err(TransportError::AlreadyExists);
        }
        state.containers.insert(container.to_string(), HashMap::new());
        state
            .localities
            .insert(container.to_string(), locality.to_string());
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> TransportResult<Option<Vec<u8>>> {
        let state = lock(&self.state);
        if let Some(error) = state.get_error.clone() {
            return Err(error);
        }
        Ok(state
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(key))
            .cloned())
    }

    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if let Some(remaining) = state.puts_before_failure {
            if remaining == 0 {
                return Err(TransportError::Fatal("injected put failure".into()));
            }
            state.puts_before_failure = Some(remaining - 1);
        }
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or(TransportError::NotFound)?;
        blobs.insert(key.to_string(), bytes);
        state.puts += 1;
        Ok(())
    }
}

/// An archive accepted by [`MemoryVault`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    pub vault: String,
    pub file_name: String,
    pub id: String,
    pub size: u64,
}

#[derive(Debug, Default)]
struct VaultState {
    vaults: HashSet<String>,
    archives: Vec<StoredArchive>,
    create_error: Option<TransportError>,
    upload_failures: Vec<TransportError>,
}

/// Vault living entirely in memory
#[derive(Debug, Default)]
pub struct MemoryVault {
    state: Mutex<VaultState>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create_vault` call fail with `error`
    pub fn fail_create(&self, error: TransportError) {
        lock(&self.state).create_error = Some(error);
    }

    /// Fail the next `count` uploads with `error`
    pub fn fail_next_uploads(&self, count: usize, error: TransportError) {
        let mut state = lock(&self.state);
        state
            .upload_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Every archive accepted so far, in upload order
    pub fn archives(&self) -> Vec<StoredArchive> {
        lock(&self.state).archives.clone()
    }

    pub fn upload_count(&self) -> usize {
        lock(&self.state).archives.len()
    }

    pub fn has_vault(&self, vault: &str) -> bool {
        lock(&self.state).vaults.contains(vault)
    }
}

#[async_trait]
impl ColdVault for MemoryVault {
    async fn create_vault(&self, vault: &str) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = state.create_error.clone() {
            return Err(error);
        }
        if !state.vaults.insert(vault.to_string()) {
            return Err(TransportError::AlreadyExists);
        }
        Ok(())
    }

    async fn upload(&self, vault: &str, archive: &Path) -> TransportResult<String> {
        {
            let mut state = lock(&self.state);
            if !state.upload_failures.is_empty() {
                return Err(state.upload_failures.remove(0));
            }
        }

        let size = tokio::fs::metadata(archive)
            .await
            .map_err(|e| TransportError::from_io(&e))?
            .len();

        let mut state = lock(&self.state);
        if !state.vaults.contains(vault) {
            return Err(TransportError::Fatal(format!("vault <{vault}> does not exist")));
        }
        let id = Uuid::new_v4().simple().to_string();
        state.archives.push(StoredArchive {
            vault: vault.to_string(),
            file_name: archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            id: id.clone(),
            size,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_failure_injection() {
        let store = MemoryIndexStore::with_container("bucket");
        store.fail_puts_after(1);

        assert!(store.put("bucket", "k", vec![1]).await.is_ok());
        assert!(matches!(
            store.put("bucket", "k", vec![2]).await,
            Err(TransportError::Fatal(_))
        ));
        assert_eq!(store.blob("bucket", "k"), Some(vec![1]));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_failures_are_consumed_in_order() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.tar.gz");
        std::fs::write(&archive, b"abc").unwrap();

        let vault = MemoryVault::new();
        vault.create_vault("v").await.unwrap();
        vault.fail_next_uploads(1, TransportError::Transient("busy".into()));

        assert!(vault.upload("v", &archive).await.is_err());
        let id = vault.upload("v", &archive).await.unwrap();

        let archives = vault.archives();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].id, id);
        assert_eq!(archives[0].file_name, "a.tar.gz");
        assert_eq!(archives[0].size, 3);
    }
}
