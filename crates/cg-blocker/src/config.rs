//! Blocker configuration

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cg_core::tracker_db::TRACKER_DB_RESOURCE;
use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Where the blocker finds its resources and keeps its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockerConfig {
    /// Bundled rule lists and tracker database (`<name>.json`)
    pub resources_dir: PathBuf,
    /// Allow-list files
    pub documents_dir: PathBuf,
    /// Compiled rule lists
    pub store_dir: PathBuf,
    /// JSON marker file
    pub marker_path: PathBuf,
    /// Resource name of the tracker database
    pub tracker_db_resource: String,
    /// Optional Public Suffix List (`public_suffix_list.dat` format)
    pub psl_path: Option<PathBuf>,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            resources_dir: PathBuf::from("resources"),
            documents_dir: PathBuf::from("documents"),
            store_dir: PathBuf::from("documents/compiled-rules"),
            marker_path: PathBuf::from("documents/markers.json"),
            tracker_db_resource: TRACKER_DB_RESOURCE.to_string(),
            psl_path: None,
        }
    }
}

impl BlockerConfig {
    /// Layout rooted at a single state directory.
    pub fn with_root(resources_dir: impl Into<PathBuf>, state_dir: &Path) -> Self {
        Self {
            resources_dir: resources_dir.into(),
            documents_dir: state_dir.to_path_buf(),
            store_dir: state_dir.join("compiled-rules"),
            marker_path: state_dir.join("markers.json"),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocker.json");
        fs::write(&path, r#"{"resources_dir": "/opt/cg/resources"}"#).unwrap();

        let config = BlockerConfig::from_file(&path).unwrap();
        assert_eq!(config.resources_dir, PathBuf::from("/opt/cg/resources"));
        assert_eq!(config.tracker_db_resource, TRACKER_DB_RESOURCE);
        assert!(config.psl_path.is_none());
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BlockerConfig::from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));

        let path = dir.path().join("bad.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(BlockerConfig::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_with_root() {
        let config = BlockerConfig::with_root("res", Path::new("/var/cg"));
        assert_eq!(config.store_dir, PathBuf::from("/var/cg/compiled-rules"));
        assert_eq!(config.marker_path, PathBuf::from("/var/cg/markers.json"));
    }
}
