//! Packaging a source folder into a single archive file.

use crate::folder::{FolderFile, SourceFolder};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of every archive produced
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Bytes of the little-endian Unix timestamp kept in archive names
const TIMESTAMP_WIDTH: usize = 6;

/// Derive the archive file name for `folder_name` created at `at`.
///
/// The name is unique at second granularity: two archives of one folder
/// created within the same second share a name. Characters other
/// than alphanumerics, `.`, `_` and `-` become `-`, so distinct folders
/// such as `a b` and `a-b` can share one too.
pub fn archive_name(folder_name: &str, at: DateTime<Utc>) -> String {
    let base: String = folder_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let seconds = at.timestamp().max(0) as u64;
    let stamp = BASE32_NOPAD.encode(&seconds.to_le_bytes()[..TIMESTAMP_WIDTH]);

    format!("{base}_{stamp}.{ARCHIVE_EXTENSION}")
}

/// Archive `files` of `folder` into `destination`, named after `at`
pub fn archive(
    folder: &SourceFolder,
    files: &[FolderFile],
    destination: &Path,
    at: DateTime<Utc>,
) -> Result<PathBuf> {
    archive_as(folder, files, destination, &archive_name(&folder.name, at))
}

/// Archive `files` of `folder` into `destination` under an explicit name.
///
/// The archive file is created exclusively; an existing file of that name
/// is reported as [`Error::ArchiveExists`] and left untouched.
pub fn archive_as(
    folder: &SourceFolder,
    files: &[FolderFile],
    destination: &Path,
    name: &str,
) -> Result<PathBuf> {
    let archive_path = destination.join(name);
    info!("Writing to archive: <{}>", archive_path.display());

    let file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&archive_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(Error::ArchiveExists { path: archive_path });
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = write_entries(file, folder, files) {
        let _ = fs::remove_file(&archive_path);
        return Err(e);
    }

    Ok(archive_path)
}

fn write_entries(file: File, folder: &SourceFolder, files: &[FolderFile]) -> Result<()> {
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in files {
        let entry_name = entry.entry_name(&folder.name);
        debug!("Adding <{}> to archive as <{}>", entry.path.display(), entry_name);
        builder.append_path_with_name(&entry.path, &entry_name)?;
    }

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
