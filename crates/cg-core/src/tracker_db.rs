//! Tracker database
//!
//! Maps the base domain (eTLD+1) of a request to the tracker that owns it.
//! The table is parsed once from a bundled JSON resource of the shape
//!
//! ```json
//! { "apps": { "<id>": { "cat": "<category>" } }, "domains": { "<domain>": "<id>" } }
//! ```
//!
//! on a blocking worker and published exactly once. Until it is published
//! every classification resolves to `None`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bundle::{BundleError, ResourceBundle};
use crate::domain::matches_any;
use crate::psl::get_etld1;
use crate::types::{Tracker, WtmCategory};
use crate::url::normalized_host;

/// Default resource name of the tracker database.
pub const TRACKER_DB_RESOURCE: &str = "tracker_db_v2";

/// Error type for tracker database loading.
#[derive(Debug, thiserror::Error)]
pub enum TrackerDbError {
    #[error("tracker database resource unavailable: {0}")]
    Bundle(#[from] BundleError),
    #[error("tracker database is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tracker database has no '{0}' object")]
    MissingSection(&'static str),
}

// =============================================================================
// Tracker Table
// =============================================================================

/// Immutable `domain -> Tracker` table.
#[derive(Debug, Default, Clone)]
pub struct TrackerTable {
    trackers: HashMap<String, Tracker>,
}

impl TrackerTable {
    /// Parse the tracker database JSON.
    ///
    /// Domains pointing at an unknown app, or at an app whose category is not
    /// a known [`WtmCategory`], are left out of the table.
    pub fn from_json(text: &str) -> Result<Self, TrackerDbError> {
        let root: Value = serde_json::from_str(text)?;

        let apps = root
            .get("apps")
            .and_then(Value::as_object)
            .ok_or(TrackerDbError::MissingSection("apps"))?;

        let categories: HashMap<&str, &str> = apps
            .iter()
            .filter_map(|(id, app)| {
                let category = app.get("cat")?.as_str()?;
                Some((id.as_str(), category))
            })
            .collect();

        let domains = root
            .get("domains")
            .and_then(Value::as_object)
            .ok_or(TrackerDbError::MissingSection("domains"))?;

        let mut trackers = HashMap::with_capacity(domains.len());
        let mut skipped = 0usize;
        for (domain, app_id) in domains {
            let id = match app_id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let category = categories
                .get(id.as_str())
                .and_then(|raw| WtmCategory::from_raw(raw));
            match category {
                Some(category) => {
                    trackers.insert(domain.to_ascii_lowercase(), Tracker::new(category, id));
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            log::debug!("tracker database: skipped {} domains without a known category", skipped);
        }

        Ok(Self { trackers })
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Tracker registered for exactly this domain.
    pub fn get(&self, domain: &str) -> Option<&Tracker> {
        self.trackers.get(domain)
    }

    /// Classify `url` by its base domain.
    ///
    /// `allow_list_regex` suppresses a hit when any pattern matches the base
    /// domain.
    pub fn lookup<S: AsRef<str>>(&self, url: &str, allow_list_regex: &[S]) -> Option<Tracker> {
        let host = normalized_host(url)?;
        let base_domain = get_etld1(&host);
        let tracker = self.trackers.get(&base_domain)?;

        if !allow_list_regex.is_empty() && matches_any(allow_list_regex, &base_domain) {
            return None;
        }
        Some(tracker.clone())
    }
}

// =============================================================================
// Classification Future
// =============================================================================

/// Result of a classification, resolved exactly once.
#[derive(Debug)]
pub struct Classification {
    rx: oneshot::Receiver<Option<Tracker>>,
}

impl Classification {
    fn resolved(value: Option<Tracker>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }
}

impl Future for Classification {
    type Output = Option<Tracker>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the worker died; treat as a miss
        Pin::new(&mut self.rx).poll(cx).map(|result| result.unwrap_or(None))
    }
}

// =============================================================================
// Tracker Database
// =============================================================================

/// Process-wide tracker database handle. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct TrackerDatabase {
    table: Arc<OnceLock<TrackerTable>>,
}

impl TrackerDatabase {
    /// An empty, not yet loaded database.
    pub fn new() -> Self {
        Self::default()
    }

    /// A database that is ready immediately.
    pub fn with_table(table: TrackerTable) -> Self {
        let db = Self::new();
        let _ = db.table.set(table);
        db
    }

    /// Whether the table has been published.
    pub fn is_ready(&self) -> bool {
        self.table.get().is_some()
    }

    /// Number of domains in the published table.
    pub fn len(&self) -> usize {
        self.table.get().map(TrackerTable::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load `resource` from `bundle` on a blocking worker and publish it.
    ///
    /// Load failures are logged and leave the database unpublished, which
    /// disables classification for the rest of the process.
    pub fn startup(&self, bundle: Arc<dyn ResourceBundle>, resource: &str) -> JoinHandle<()> {
        let cell = Arc::clone(&self.table);
        let resource = resource.to_string();

        tokio::task::spawn_blocking(move || {
            let loaded = bundle
                .read(&resource)
                .map_err(TrackerDbError::from)
                .and_then(|text| TrackerTable::from_json(&text));

            match loaded {
                Ok(table) => {
                    log::info!("tracker database loaded: {} domains", table.len());
                    if cell.set(table).is_err() {
                        log::warn!("tracker database already published, ignoring reload");
                    }
                }
                Err(e) => log::error!("tracker database '{}' failed to load: {}", resource, e),
            }
        })
    }

    /// Classify `url` against the table, net of the given allow-list regexes.
    ///
    /// The regex evaluation runs on a blocking worker, so this must be called
    /// from within a Tokio runtime.
    pub fn classify(&self, url: &str, allow_list_regex: Vec<String>) -> Classification {
        if self.table.get().is_none() || normalized_host(url).is_none() {
            return Classification::resolved(None);
        }

        let (tx, rx) = oneshot::channel();
        let table = Arc::clone(&self.table);
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            let result = table
                .get()
                .and_then(|table| table.lookup(&url, &allow_list_regex));
            let _ = tx.send(result);
        });

        Classification { rx }
    }
}
