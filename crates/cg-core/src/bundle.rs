//! Bundled resources
//!
//! Rule lists and the tracker database ship as JSON resources next to the
//! application. [`ResourceBundle`] is the read-only view of that package.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

/// Error type for bundled resource access.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("resource '{0}' is not in the bundle")]
    NotFound(String),
    #[error("failed to read resource '{name}': {source}")]
    Io { name: String, source: io::Error },
}

/// Read access to named JSON resources.
pub trait ResourceBundle: Send + Sync {
    /// Contents of the resource `name` (without extension).
    fn read(&self, name: &str) -> Result<String, BundleError>;

    /// Last modification time of the resource, if known.
    fn modified(&self, name: &str) -> Option<SystemTime>;
}

// =============================================================================
// Directory Bundle
// =============================================================================

/// Resources stored as `<root>/<name>.json`.
#[derive(Debug, Clone)]
pub struct DirBundle {
    root: PathBuf,
}

impl DirBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

impl ResourceBundle for DirBundle {
    fn read(&self, name: &str) -> Result<String, BundleError> {
        fs::read_to_string(self.path_for(name)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                BundleError::NotFound(name.to_string())
            } else {
                BundleError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        fs::metadata(self.path_for(name)).and_then(|m| m.modified()).ok()
    }
}

// =============================================================================
// Memory Bundle
// =============================================================================

/// In-memory bundle, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBundle {
    resources: RwLock<HashMap<String, (String, SystemTime)>>,
}

impl MemoryBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource, stamped with the current time.
    pub fn insert(&self, name: &str, contents: impl Into<String>) {
        self.insert_with_date(name, contents, SystemTime::now());
    }

    pub fn insert_with_date(&self, name: &str, contents: impl Into<String>, modified: SystemTime) {
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(name.to_string(), (contents.into(), modified));
        }
    }
}

impl ResourceBundle for MemoryBundle {
    fn read(&self, name: &str) -> Result<String, BundleError> {
        self.resources
            .read()
            .ok()
            .and_then(|resources| resources.get(name).map(|(contents, _)| contents.clone()))
            .ok_or_else(|| BundleError::NotFound(name.to_string()))
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        self.resources
            .read()
            .ok()
            .and_then(|resources| resources.get(name).map(|(_, modified)| *modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_bundle_reads_json_resources() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rules.json"), "[]").unwrap();

        let bundle = DirBundle::new(dir.path());
        assert_eq!(bundle.read("rules").unwrap(), "[]");
        assert!(bundle.modified("rules").is_some());
        assert!(matches!(bundle.read("missing"), Err(BundleError::NotFound(_))));
        assert!(bundle.modified("missing").is_none());
    }

    #[test]
    fn test_memory_bundle() {
        let bundle = MemoryBundle::new();
        let date = SystemTime::UNIX_EPOCH;
        bundle.insert_with_date("a", "{}", date);
        assert_eq!(bundle.read("a").unwrap(), "{}");
        assert_eq!(bundle.modified("a"), Some(date));
        assert!(bundle.read("b").is_err());
    }
}
