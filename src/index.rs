//! Version index: the durable record of every archive ever made.
//!
//! The index is a single SQLite file with two tables. `archive` holds one
//! row per uploaded version of a folder; `file_entry` holds the manifest
//! of each archive and is owned by it. Rows are only ever appended, apart
//! from filling in the upload fields once the vault confirms an upload.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS archive (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    folder_name TEXT NOT NULL,
    checksum    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    uploaded_at TEXT,
    external_id TEXT,
    CHECK ((uploaded_at IS NULL) = (external_id IS NULL))
);
CREATE INDEX IF NOT EXISTS archive_folder_name ON archive (folder_name);

CREATE TABLE IF NOT EXISTS file_entry (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    archive_id INTEGER NOT NULL REFERENCES archive (id) ON DELETE CASCADE,
    path       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS file_entry_archive ON file_entry (archive_id);
";

const ARCHIVE_COLUMNS: &str =
    "id, name, folder_name, checksum, created_at, uploaded_at, external_id";

/// One backed-up version of one folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub id: i64,
    /// Archive file name, unique across the index
    pub name: String,
    pub folder_name: String,
    /// Folder digest at archive time
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    /// Set together with `external_id` once the vault accepted the upload
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Identifier assigned by the vault
    pub external_id: Option<String>,
}

impl Archive {
    pub fn is_uploaded(&self) -> bool {
        self.external_id.is_some()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            folder_name: row.get(2)?,
            checksum: row.get(3)?,
            created_at: row.get(4)?,
            uploaded_at: row.get(5)?,
            external_id: row.get(6)?,
        })
    }
}

/// Handle on a local index file
#[derive(Debug)]
pub struct VersionIndex {
    conn: Connection,
    path: PathBuf,
}

impl VersionIndex {
    /// Open the index at `path`, creating the file and tables if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened version index at {}", path.display());

        Ok(Self { conn, path })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every checksum ever recorded for `folder_name`
    pub fn folder_checksums(&self, folder_name: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT checksum FROM archive WHERE folder_name = ?1")?;
        let checksums = stmt
            .query_map(params![folder_name], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(checksums)
    }

    /// Record a new version of `folder_name` with its manifest.
    ///
    /// The archive row and all of its file entries are written in one
    /// transaction; upload fields start out empty.
    pub fn record_version(
        &mut self,
        folder_name: &str,
        checksum: &str,
        archive_name: &str,
        file_paths: &[String],
        created_at: DateTime<Utc>,
    ) -> Result<Archive> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO archive (name, folder_name, checksum, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![archive_name, folder_name, checksum, created_at],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut insert =
                tx.prepare_cached("INSERT INTO file_entry (archive_id, path) VALUES (?1, ?2)")?;
            for path in file_paths {
                insert.execute(params![id, path])?;
            }
        }
        tx.commit()?;

        debug!(
            "Recorded <{}> for <{}> with {} files",
            archive_name,
            folder_name,
            file_paths.len()
        );

        Ok(Archive {
            id,
            name: archive_name.to_string(),
            folder_name: folder_name.to_string(),
            checksum: checksum.to_string(),
            created_at,
            uploaded_at: None,
            external_id: None,
        })
    }

    /// Whether an archive named `archive_name` was ever recorded
    pub fn contains_archive(&self, archive_name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM archive WHERE name = ?1",
                params![archive_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fill in the upload fields of the archive named `archive_name`.
    ///
    /// Upload fields are written once; marking an uploaded archive again is
    /// [`Error::AlreadyUploaded`].
    pub fn mark_uploaded(
        &self,
        archive_name: &str,
        external_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE archive SET external_id = ?1, uploaded_at = ?2
             WHERE name = ?3 AND external_id IS NULL",
            params![external_id, uploaded_at, archive_name],
        )?;

        if updated == 0 {
            let name = archive_name.to_string();
            return Err(if self.contains_archive(archive_name)? {
                Error::AlreadyUploaded { name }
            } else {
                Error::ArchiveNotFound { name }
            });
        }
        Ok(())
    }

    /// The archive of `folder_name` with `checksum` that never finished
    /// uploading, if any
    pub fn pending_upload(&self, folder_name: &str, checksum: &str) -> Result<Option<Archive>> {
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archive
             WHERE folder_name = ?1 AND checksum = ?2 AND external_id IS NULL
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let archive = self
            .conn
            .query_row(&sql, params![folder_name, checksum], Archive::from_row)
            .optional()?;
        Ok(archive)
    }

    /// Version history of `folder_name`, oldest first
    pub fn history(&self, folder_name: &str) -> Result<Vec<Archive>> {
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archive WHERE folder_name = ?1 ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let archives = stmt
            .query_map(params![folder_name], Archive::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(archives)
    }

    /// Every folder name with at least one version
    pub fn folders(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT folder_name FROM archive ORDER BY folder_name")?;
        let folders = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(folders)
    }

    /// Manifest of the archive named `archive_name`
    pub fn file_entries(&self, archive_name: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.path FROM file_entry f
             JOIN archive a ON a.id = f.archive_id
             WHERE a.name = ?1 ORDER BY f.id",
        )?;
        let paths = stmt
            .query_map(params![archive_name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Write any buffered pages to the backing file
    pub fn flush(&self) -> Result<()> {
        self.conn.cache_flush()?;
        Ok(())
    }

    /// Release the database handle
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Database(e))
    }
}
