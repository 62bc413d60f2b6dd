//! ContentGuard Core Library
//!
//! This crate provides the data model and the classification side of the
//! ContentGuard content blocker: deciding which tracker a request belongs to
//! and which domains the user exempted from blocking.
//!
//! # Modules
//!
//! - `types`: Tracker categories, rule list names, allow-list kinds, status
//! - `url`: Host extraction without a full URL parser
//! - `psl`: Public Suffix List for eTLD+1 extraction
//! - `domain`: Memoized wildcard-domain to regex conversion
//! - `allowlist`: Persisted per-category domain allow-lists
//! - `bundle`: Read access to bundled JSON resources
//! - `tracker_db`: Async-loaded domain to tracker table
//! - `stats`: Per-page counters and the blocker status state machine

pub mod allowlist;
pub mod bundle;
pub mod domain;
pub mod psl;
pub mod stats;
pub mod tracker_db;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use allowlist::{AllowListStore, AllowListedDomains};
pub use bundle::{BundleError, DirBundle, MemoryBundle, ResourceBundle};
pub use domain::wildcard_to_regex;
pub use psl::get_etld1;
pub use stats::{blocker_status, PageStats, StatusInputs};
pub use tracker_db::{Classification, TrackerDatabase, TrackerTable};
pub use types::{AllowListKind, BlockerStatus, BlocklistName, Tracker, WtmCategory};
