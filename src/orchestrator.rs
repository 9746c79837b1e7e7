//! The backup run: discovery, dedup, archiving, upload and checkpointing.
//!
//! A run pulls the version index, walks the source folders under the root
//! in name order and, for every folder whose digest is new, archives it,
//! records the version, uploads the archive and pushes the index before
//! moving on. Pushing after every folder bounds what a crash can lose to
//! the folder in flight.
//!
//! Everything is sequential. The processing limit only prevents starting
//! another folder.

use crate::archiver::{archive_as, archive_name};
use crate::config::IceboxConfig;
use crate::folder::{list_contents, list_folders, FolderFile, SourceFolder};
use crate::hasher::hash_files;
use crate::index::VersionIndex;
use crate::remote::{ColdVault, RemoteIndexStore};
use crate::sync::RemoteIndexSync;
use crate::vault::VaultUploader;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument, Span};

/// What happened to one folder during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FolderOutcome {
    /// Digest already in the folder's history
    Skipped { folder: String, checksum: String },
    /// New version archived, uploaded and recorded
    Archived {
        folder: String,
        archive: String,
        external_id: String,
    },
    /// A version recorded by an earlier run was uploaded at last
    Resumed {
        folder: String,
        archive: String,
        external_id: String,
    },
    /// The folder could not be backed up; the run went on
    Failed { folder: String, reason: String },
}

impl FolderOutcome {
    pub fn folder(&self) -> &str {
        match self {
            FolderOutcome::Skipped { folder, .. }
            | FolderOutcome::Archived { folder, .. }
            | FolderOutcome::Resumed { folder, .. }
            | FolderOutcome::Failed { folder, .. } => folder,
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<FolderOutcome>,
    /// The run stopped because the processing limit was hit
    pub limit_reached: bool,
}

impl RunReport {
    pub fn archived(&self) -> usize {
        self.count(|o| matches!(o, FolderOutcome::Archived { .. }))
    }

    pub fn resumed(&self) -> usize {
        self.count(|o| matches!(o, FolderOutcome::Resumed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FolderOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FolderOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FolderOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Sequences one backup run
pub struct BackupOrchestrator {
    root: PathBuf,
    limit: Option<usize>,
    sync: RemoteIndexSync,
    uploader: VaultUploader,
    clock: fn() -> DateTime<Utc>,
    span: Span,
}

impl BackupOrchestrator {
    /// Build an orchestrator for a validated configuration
    pub fn new(
        config: &IceboxConfig,
        store: Arc<dyn RemoteIndexStore>,
        vault: Arc<dyn ColdVault>,
    ) -> Result<Self> {
        config.validate()?;

        let span = tracing::info_span!("backup", root = %config.root_folder.display());
        let sync = RemoteIndexSync::new(
            store,
            config.bucket.as_str(),
            config.region.as_str(),
            &span,
        )
        .with_key(config.index_key.as_str())
        .with_retry(config.retry.clone());
        let uploader = VaultUploader::new(vault, config.vault.as_str(), &span)
            .with_retry(config.retry.clone());

        Ok(Self {
            root: config.root_folder.clone(),
            limit: config.limit,
            sync,
            uploader,
            clock: Utc::now,
            span,
        })
    }

    /// Use `clock` for archive creation times
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Perform one backup run
    pub async fn run(&self) -> Result<RunReport> {
        self.run_in_scratch().instrument(self.span.clone()).await
    }

    async fn run_in_scratch(&self) -> Result<RunReport> {
        match self.limit {
            Some(limit) => info!("Performing backup with limit {}", limit),
            None => info!("Performing backup without limit"),
        }

        // Removed on drop, whichever way the run ends
        let scratch = tempfile::Builder::new().prefix("icebox-").tempdir()?;

        self.sync.ensure_container().await?;
        self.uploader.ensure_vault().await?;

        let mut index = self.sync.pull(scratch.path()).await?;
        info!("Retrieved index");

        let result = self.process_folders(&mut index, scratch.path()).await;

        info!("Closing local index");
        let closed = index.close();
        let report = result?;
        closed?;

        info!("Cleaning up scratch directory");
        scratch.close()?;

        info!(
            "Backup finished: {} archived, {} resumed, {} skipped, {} failed",
            report.archived(),
            report.resumed(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    async fn process_folders(&self, index: &mut VersionIndex, scratch: &Path) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut remaining = self.limit;

        info!("Starting to walk <{}>", self.root.display());
        for folder in list_folders(&self.root)? {
            info!("Currently processing <{}>", folder.name);

            let outcome = match self.process_folder(index, &folder, scratch).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_folder_local() => {
                    error!("Could not back up <{}>: {}", folder.name, e);
                    FolderOutcome::Failed {
                        folder: folder.name.clone(),
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };

            let started_work = !matches!(outcome, FolderOutcome::Skipped { .. });
            report.outcomes.push(outcome);

            if started_work {
                if let Some(left) = remaining.as_mut() {
                    *left = left.saturating_sub(1);
                    if *left == 0 {
                        info!("Limit reached, stopping");
                        report.limit_reached = true;
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn process_folder(
        &self,
        index: &mut VersionIndex,
        folder: &SourceFolder,
        scratch: &Path,
    ) -> Result<FolderOutcome> {
        // One listing feeds the digest, the archive and the manifest
        let files = list_contents(&folder.path)?;
        let checksum = hash_files(&files)?;
        debug!("<{}> hashes to <{}>", folder.name, checksum);

        if index.folder_checksums(&folder.name)?.contains(&checksum) {
            return match index.pending_upload(&folder.name, &checksum)? {
                Some(pending) => {
                    info!(
                        "<{}> was recorded as <{}> but never uploaded. Resuming",
                        folder.name, pending.name
                    );
                    let path = archive_as(folder, &files, scratch, &pending.name)?;
                    let external_id = self
                        .upload_and_checkpoint(index, &path, &pending.name)
                        .await?;
                    Ok(FolderOutcome::Resumed {
                        folder: folder.name.clone(),
                        archive: pending.name,
                        external_id,
                    })
                }
                None => {
                    info!("<{}> hash already exists for <{}>. Skipping", checksum, folder.name);
                    Ok(FolderOutcome::Skipped {
                        folder: folder.name.clone(),
                        checksum,
                    })
                }
            };
        }

        let created_at = (self.clock)();
        let archive_name = archive_name(&folder.name, created_at);
        // Names are lossy, so distinct folders can map to a recorded name
        if index.contains_archive(&archive_name)? {
            return Err(Error::ArchiveExists {
                path: scratch.join(&archive_name),
            });
        }

        let path = archive_as(folder, &files, scratch, &archive_name)?;
        info!("Archived <{}> to <{}>", folder.name, archive_name);

        index.record_version(
            &folder.name,
            &checksum,
            &archive_name,
            &manifest(folder, &files),
            created_at,
        )?;

        let external_id = self.upload_and_checkpoint(index, &path, &archive_name).await?;
        Ok(FolderOutcome::Archived {
            folder: folder.name.clone(),
            archive: archive_name,
            external_id,
        })
    }

    /// Upload a recorded archive, mark it on success and push the index
    /// either way. A version left without upload fields is picked up again
    /// by the next run.
    async fn upload_and_checkpoint(
        &self,
        index: &VersionIndex,
        path: &Path,
        archive_name: &str,
    ) -> Result<String> {
        let uploaded = match self.uploader.upload(path).await {
            Ok(external_id) => index
                .mark_uploaded(archive_name, &external_id, Utc::now())
                .map(|()| external_id),
            Err(e) => Err(e),
        };

        self.sync.push(index).await?;

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove <{}> from scratch: {}", path.display(), e);
        }

        uploaded
    }
}

fn manifest(folder: &SourceFolder, files: &[FolderFile]) -> Vec<String> {
    files.iter().map(|f| f.entry_name(&folder.name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryIndexStore, MemoryVault, TransportError};
    use crate::retry::RetryPolicy;
    use crate::sync::DEFAULT_INDEX_KEY;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        store: Arc<MemoryIndexStore>,
        vault: Arc<MemoryVault>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                store: Arc::new(MemoryIndexStore::new()),
                vault: Arc::new(MemoryVault::new()),
            }
        }

        fn write(&self, relative: &str, contents: &[u8]) {
            let path = self.root.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        fn config(&self, limit: Option<usize>) -> IceboxConfig {
            IceboxConfig {
                region: "eu-central-1".to_string(),
                bucket: "metadata".to_string(),
                vault: "photos".to_string(),
                root_folder: self.root.path().to_path_buf(),
                limit,
                retry: RetryPolicy::immediate(0),
                ..IceboxConfig::default()
            }
        }

        async fn run(&self, limit: Option<usize>) -> Result<RunReport> {
            BackupOrchestrator::new(&self.config(limit), self.store.clone(), self.vault.clone())?
                .run()
                .await
        }

        /// Open the remote copy of the index
        fn remote_index(&self, scratch: &TempDir) -> VersionIndex {
            let path = scratch.path().join("remote.db");
            let bytes = self.store.blob("metadata", DEFAULT_INDEX_KEY).unwrap_or_default();
            fs::write(&path, bytes).unwrap();
            VersionIndex::open(&path).unwrap()
        }
    }

    #[tokio::test]
    async fn test_first_run_backs_up_every_folder() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.write("beta/b.txt", b"b");
        fx.write("loose.txt", b"not a folder");

        let report = fx.run(None).await?;
        assert_eq!(report.archived(), 2);
        assert!(!report.limit_reached);
        assert_eq!(fx.vault.upload_count(), 2);
        assert_eq!(fx.store.locality("metadata").as_deref(), Some("eu-central-1"));
        // One checkpoint per folder
        assert_eq!(fx.store.put_count(), 2);

        let scratch = TempDir::new()?;
        let index = fx.remote_index(&scratch);
        assert_eq!(index.folders()?, vec!["alpha".to_string(), "beta".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_folders_are_skipped() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.run(None).await?;
        let puts = fx.store.put_count();

        let report = fx.run(None).await?;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.archived(), 0);
        assert_eq!(fx.vault.upload_count(), 1);
        assert_eq!(fx.store.put_count(), puts);

        let scratch = TempDir::new()?;
        assert_eq!(fx.remote_index(&scratch).history("alpha")?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_folder_appends_a_version() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.run(None).await?;

        fx.write("alpha/new.txt", b"new");
        let report = fx.run(None).await?;
        assert_eq!(report.archived(), 1);

        let scratch = TempDir::new()?;
        let history = fx.remote_index(&scratch).history("alpha")?;
        assert_eq!(history.len(), 2);
        assert_ne!(history[0].checksum, history[1].checksum);
        assert!(history.iter().all(|a| a.is_uploaded()));
        Ok(())
    }

    #[tokio::test]
    async fn test_manifest_matches_folder_contents() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/z.txt", b"z");
        fx.write("alpha/sub/a.txt", b"a");

        let report = fx.run(None).await?;
        let archive = match &report.outcomes[0] {
            FolderOutcome::Archived { archive, .. } => archive.clone(),
            other => panic!("unexpected outcome {other:?}"),
        };

        let scratch = TempDir::new()?;
        let entries = fx.remote_index(&scratch).file_entries(&archive)?;
        assert_eq!(
            entries,
            vec!["alpha/sub/a.txt".to_string(), "alpha/z.txt".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_is_never_marked_and_resumes() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.write("beta/b.txt", b"b");
        fx.vault.fail_next_uploads(1, TransportError::Fatal("denied".into()));

        let report = fx.run(None).await?;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.archived(), 1);
        assert_eq!(report.outcomes[0].folder(), "alpha");

        let scratch = TempDir::new()?;
        let history = fx.remote_index(&scratch).history("alpha")?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].external_id, None);
        assert_eq!(history[0].uploaded_at, None);

        // The next run uploads the recorded version instead of adding one
        let report = fx.run(None).await?;
        assert_eq!(report.resumed(), 1);
        assert_eq!(report.skipped(), 1);

        let scratch = TempDir::new()?;
        let history = fx.remote_index(&scratch).history("alpha")?;
        assert_eq!(history.len(), 1);
        assert!(history[0].is_uploaded());
        assert_eq!(
            fx.vault.archives().last().map(|a| a.file_name.clone()),
            Some(history[0].name.clone())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_checkpoint_reflects_completed_folders_only() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.write("beta/b.txt", b"b");
        fx.write("gamma/c.txt", b"c");
        fx.store.fail_puts_after(1);

        let result = fx.run(None).await;
        assert!(matches!(result, Err(Error::Transport { op: "index upload", .. })));

        let scratch = TempDir::new()?;
        let index = fx.remote_index(&scratch);
        assert_eq!(index.folders()?, vec!["alpha".to_string()]);
        assert!(index.history("alpha")?[0].is_uploaded());
        Ok(())
    }

    #[tokio::test]
    async fn test_limit_stops_before_next_folder() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.write("beta/b.txt", b"b");

        let report = fx.run(Some(1)).await?;
        assert!(report.limit_reached);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.archived(), 1);

        let scratch = TempDir::new()?;
        let index = fx.remote_index(&scratch);
        assert_eq!(index.folders()?, vec!["alpha".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_skipped_folders_do_not_count_towards_limit() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.run(None).await?;
        fx.write("beta/b.txt", b"b");

        let report = fx.run(Some(1)).await?;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.archived(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_name_clash_fails_only_that_folder() -> Result<()> {
        let fx = Fixture::new();
        fx.write("a b/one.txt", b"one");
        fx.write("a-b/two.txt", b"two");
        fx.write("c/three.txt", b"three");

        let report =
            BackupOrchestrator::new(&fx.config(None), fx.store.clone(), fx.vault.clone())?
                .with_clock(|| Utc.timestamp_opt(1_700_000_000, 0).unwrap())
                .run()
                .await?;

        assert_eq!(report.archived(), 2);
        assert!(matches!(
            &report.outcomes[1],
            FolderOutcome::Failed { folder, .. } if folder == "a-b"
        ));
        assert_eq!(report.outcomes[2].folder(), "c");
        assert_eq!(fx.vault.upload_count(), 2);

        let scratch = TempDir::new()?;
        let index = fx.remote_index(&scratch);
        assert_eq!(index.folders()?, vec!["a b".to_string(), "c".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_folder_counts_towards_limit() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.write("beta/b.txt", b"b");
        fx.vault.fail_next_uploads(1, TransportError::Fatal("denied".into()));

        let report = fx.run(Some(1)).await?;
        assert!(report.limit_reached);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failed(), 1);

        let scratch = TempDir::new()?;
        assert_eq!(fx.remote_index(&scratch).folders()?, vec!["alpha".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_failure_aborts_without_uploading() -> Result<()> {
        let fx = Fixture::new();
        fx.write("alpha/a.txt", b"a");
        fx.store.insert_blob("metadata", DEFAULT_INDEX_KEY, Vec::new());
        fx.store.fail_get(TransportError::Transient("connection reset".into()));

        let result = fx.run(None).await;
        assert!(matches!(result, Err(Error::IndexPull { .. })));
        assert_eq!(fx.vault.upload_count(), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let fx = Fixture::new();
        let config = IceboxConfig {
            vault: String::new(),
            ..fx.config(None)
        };
        let result = BackupOrchestrator::new(&config, fx.store.clone(), fx.vault.clone());
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
