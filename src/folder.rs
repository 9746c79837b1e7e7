//! Source folder discovery and file listing.
//!
//! A backup root holds source folders exactly one level deep. Each source
//! folder is listed recursively into a sorted set of files; the same
//! listing feeds the hasher, the archiver and the manifest so the three
//! always agree.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A source folder directly under the backup root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFolder {
    /// Full path of the folder
    pub path: PathBuf,
    /// Folder name, the key of its version history
    pub name: String,
}

/// One regular file inside a source folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFile {
    /// Location on disk
    pub path: PathBuf,
    /// `/`-separated path relative to the folder
    pub relative: String,
}

impl FolderFile {
    /// Name of the file inside an archive of `folder_name`
    pub fn entry_name(&self, folder_name: &str) -> String {
        format!("{}/{}", folder_name, self.relative)
    }
}

/// List the immediate child directories of `root`, sorted by name
pub fn list_folders<P: AsRef<Path>>(root: P) -> Result<Vec<SourceFolder>> {
    let root = root.as_ref();
    let mut folders = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        folders.push(SourceFolder {
            path: entry.path(),
            name: entry.file_name().to_string_lossy().into_owned(),
        });
    }

    folders.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Found {} source folders under {}", folders.len(), root.display());
    Ok(folders)
}

/// List every regular file under `folder`, sorted by relative path.
///
/// Symbolic links are not followed. The ordering depends only on the
/// relative paths, never on traversal order or on where the folder lives.
pub fn list_contents<P: AsRef<Path>>(folder: P) -> Result<Vec<FolderFile>> {
    let folder = folder.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(folder)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(FolderFile {
            path: entry.path().to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_list_folders_is_one_level_deep() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("b-folder/nested"))?;
        fs::create_dir_all(temp_dir.path().join("a-folder"))?;
        fs::write(temp_dir.path().join("loose-file.txt"), b"ignored")?;

        let names: Vec<String> = list_folders(temp_dir.path())?
            .into_iter()
            .map(|f| f.name)
            .collect();

        assert_eq!(names, vec!["a-folder".to_string(), "b-folder".to_string()]);
        Ok(())
    }

    #[test]
    fn test_list_contents_sorted_and_relative() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let folder = temp_dir.path().join("photos");
        fs::create_dir_all(folder.join("2020/summer"))?;
        fs::write(folder.join("z.jpg"), b"z")?;
        fs::write(folder.join("2020/summer/beach.jpg"), b"beach")?;
        fs::write(folder.join("2020/a.jpg"), b"a")?;

        let relative: Vec<String> = list_contents(&folder)?
            .into_iter()
            .map(|f| f.relative)
            .collect();

        assert_eq!(
            relative,
            vec![
                "2020/a.jpg".to_string(),
                "2020/summer/beach.jpg".to_string(),
                "z.jpg".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_entry_name_is_prefixed_with_folder() {
        let file = FolderFile {
            path: PathBuf::from("/data/photos/2020/a.jpg"),
            relative: "2020/a.jpg".to_string(),
        };
        assert_eq!(file.entry_name("photos"), "photos/2020/a.jpg");
    }

    #[test]
    fn test_list_contents_of_missing_folder_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_contents(temp_dir.path().join("missing")).is_err());
    }
}
