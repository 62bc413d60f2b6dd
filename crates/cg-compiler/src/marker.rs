//! Persisted date markers
//!
//! Records when the compiled store was last rebuilt from the bundle, keyed by
//! name. Dates are stored as milliseconds since the Unix epoch.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Marker holding the newest bundled rule file date the store was built from.
pub const BLOCKER_FILE_DATE_KEY: &str = "blocker-file-date";

/// Error type for marker persistence.
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("failed to write marker file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode markers: {0}")]
    Json(#[from] serde_json::Error),
    #[error("date is before the Unix epoch")]
    BeforeEpoch,
}

/// Small persistent key -> date map.
pub trait MarkerStore: Send + Sync {
    fn date(&self, key: &str) -> Option<SystemTime>;

    fn set_date(&self, key: &str, date: SystemTime) -> Result<(), MarkerError>;
}

fn to_millis(date: SystemTime) -> Result<u64, MarkerError> {
    let elapsed = date.duration_since(UNIX_EPOCH).map_err(|_| MarkerError::BeforeEpoch)?;
    Ok(elapsed.as_millis() as u64)
}

/// Millisecond timestamp used for marker comparisons.
pub(crate) fn millis_since_epoch(date: SystemTime) -> Option<u64> {
    to_millis(date).ok()
}

fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

// =============================================================================
// JSON File Markers
// =============================================================================

/// Markers persisted as one JSON object.
#[derive(Debug)]
pub struct JsonMarkerStore {
    path: PathBuf,
    markers: RwLock<BTreeMap<String, u64>>,
}

impl JsonMarkerStore {
    /// Open `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let markers = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("ignoring malformed marker file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("failed to read marker file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            markers: RwLock::new(markers),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MarkerStore for JsonMarkerStore {
    fn date(&self, key: &str) -> Option<SystemTime> {
        let markers = self.markers.read().ok()?;
        markers.get(key).copied().map(from_millis)
    }

    fn set_date(&self, key: &str, date: SystemTime) -> Result<(), MarkerError> {
        let millis = to_millis(date)?;
        let text = {
            let mut markers = match self.markers.write() {
                Ok(markers) => markers,
                Err(poisoned) => poisoned.into_inner(),
            };
            markers.insert(key.to_string(), millis);
            serde_json::to_string_pretty(&*markers)?
        };

        let write_err = |source| MarkerError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(write_err)
    }
}

// =============================================================================
// Memory Markers
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: RwLock<HashMap<String, SystemTime>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn date(&self, key: &str) -> Option<SystemTime> {
        self.markers.read().ok()?.get(key).copied()
    }

    fn set_date(&self, key: &str, date: SystemTime) -> Result<(), MarkerError> {
        if let Ok(mut markers) = self.markers.write() {
            markers.insert(key.to_string(), date);
        }
        Ok(())
    }
}
