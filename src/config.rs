//! Configuration for backup runs.
//!
//! Settings come from an optional YAML file; command-line flags are
//! applied on top by the CLI before the result is validated.

use crate::retry::RetryPolicy;
use crate::sync::DEFAULT_INDEX_KEY;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceboxConfig {
    /// Region (locality constraint) of the index container
    pub region: String,
    /// Container holding the index blob
    pub bucket: String,
    /// Cold vault receiving archives
    pub vault: String,
    /// Directory whose immediate sub-folders are backed up
    pub root_folder: PathBuf,
    /// Directory backing the filesystem transport
    pub store_root: PathBuf,
    /// Key of the index blob inside the container
    pub index_key: String,
    /// Stop after starting work on this many folders
    pub limit: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for IceboxConfig {
    fn default() -> Self {
        let store_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("icebox")
            .join("store");

        Self {
            region: String::new(),
            bucket: String::new(),
            vault: String::new(),
            root_folder: PathBuf::new(),
            store_root,
            index_key: DEFAULT_INDEX_KEY.to_string(),
            limit: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl IceboxConfig {
    /// Load from `path`, or from the default location when it exists.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!("Loading config from {}", config_path.display());
        let content = fs::read_to_string(&config_path).map_err(|e| Error::Config {
            reason: format!("Failed to read {}: {}", config_path.display(), e),
        })?;

        serde_yaml::from_str(&content).map_err(|e| Error::Config {
            reason: format!("Failed to parse {}: {}", config_path.display(), e),
        })
    }

    /// Save to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// `<config dir>/icebox/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("icebox").join("config.yaml"))
    }

    /// Check that every required setting is present
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("region", self.region.is_empty()),
            ("bucket", self.bucket.is_empty()),
            ("vault", self.vault.is_empty()),
            ("root_folder", self.root_folder.as_os_str().is_empty()),
            ("index_key", self.index_key.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(Error::Config {
                reason: format!("missing required settings: {}", missing.join(", ")),
            });
        }
        if self.limit == Some(0) {
            return Err(Error::Config {
                reason: "limit must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
