//! Domain allow-lists
//!
//! An allow-list is a persisted set of hosts exempted from one blocking
//! category. Three independent stores exist (ads, tracking, popups), each
//! backed by its own newline-delimited file in the documents directory.
//!
//! The in-memory set is authoritative for the lifetime of the process. File
//! writes are best effort: failures are logged and never roll back a mutation.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::domain::wildcard_to_regex;
use crate::types::{AllowListKind, BlocklistName};
use crate::url::normalized_host;

/// Error type for allow-list persistence.
#[derive(Debug, thiserror::Error)]
pub enum AllowListError {
    #[error("failed to read allow-list '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write allow-list '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to remove allow-list '{path}': {source}")]
    Remove { path: PathBuf, source: io::Error },
}

// =============================================================================
// Allow-listed Domains
// =============================================================================

/// A domain set together with its derived regex list.
///
/// `domain_regex` is recomputed by every mutator and cannot be set directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowListedDomains {
    domain_set: BTreeSet<String>,
    domain_regex: Vec<String>,
}

impl AllowListedDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut result = Self::new();
        result.replace(domains.into_iter().map(Into::into).collect());
        result
    }

    /// Insert a domain. Returns false if it was already present.
    pub fn insert(&mut self, domain: impl Into<String>) -> bool {
        let inserted = self.domain_set.insert(domain.into());
        if inserted {
            self.recompute();
        }
        inserted
    }

    /// Remove a domain. Returns false if it was not present.
    pub fn remove(&mut self, domain: &str) -> bool {
        let removed = self.domain_set.remove(domain);
        if removed {
            self.recompute();
        }
        removed
    }

    /// Replace the whole set.
    pub fn replace(&mut self, domains: BTreeSet<String>) {
        self.domain_set = domains;
        self.recompute();
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domain_set.contains(domain)
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domain_set
    }

    /// Regex for every domain, each matching the domain and its subdomains.
    pub fn domain_regex(&self) -> &[String] {
        &self.domain_regex
    }

    pub fn is_empty(&self) -> bool {
        self.domain_set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.domain_set.len()
    }

    fn recompute(&mut self) {
        self.domain_regex = self
            .domain_set
            .iter()
            .map(|domain| wildcard_to_regex(&format!("*{}", domain)))
            .collect();
    }
}

// =============================================================================
// Allow-list Store
// =============================================================================

/// A named, file-backed allow-list.
#[derive(Debug)]
pub struct AllowListStore {
    kind: AllowListKind,
    path: Option<PathBuf>,
    domains: AllowListedDomains,
}

impl AllowListStore {
    /// Open the store for `kind`, loading `<documents_dir>/<filename>` if present.
    pub fn open(kind: AllowListKind, documents_dir: &Path) -> Self {
        let path = documents_dir.join(kind.filename());
        let domains = match read_domain_file(&path) {
            Ok(domains) => domains,
            Err(e) => {
                log::warn!("{}", e);
                BTreeSet::new()
            }
        };
        if !domains.is_empty() {
            log::debug!("loaded {} {} allow-list entries", domains.len(), kind.as_str());
        }

        let mut store = Self {
            kind,
            path: Some(path),
            domains: AllowListedDomains::new(),
        };
        store.domains.replace(domains);
        store
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(kind: AllowListKind) -> Self {
        Self {
            kind,
            path: None,
            domains: AllowListedDomains::new(),
        }
    }

    pub fn kind(&self) -> AllowListKind {
        self.kind
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn domains(&self) -> &AllowListedDomains {
        &self.domains
    }

    /// Regex patterns for all allow-listed domains.
    pub fn domain_regex(&self) -> &[String] {
        self.domains.domain_regex()
    }

    /// Whether the host of `url` is allow-listed. URLs without a host never are.
    pub fn is_allow_listed(&self, url: &str) -> bool {
        match normalized_host(url) {
            Some(host) => self.domains.contains(&host),
            None => false,
        }
    }

    /// Add or remove the host of `url`.
    ///
    /// Returns the rule lists that must be recompiled, or `None` when the URL
    /// has no host and nothing changed.
    pub fn set_allow_listed(&mut self, enabled: bool, url: &str) -> Option<&'static [BlocklistName]> {
        let host = normalized_host(url)?;

        let changed = if enabled {
            self.domains.insert(host.clone())
        } else {
            self.domains.remove(&host)
        };
        log::info!(
            "{} allow-list: {} {}{}",
            self.kind.as_str(),
            if enabled { "added" } else { "removed" },
            host,
            if changed { "" } else { " (unchanged)" }
        );

        self.save();
        Some(self.kind.dependent_lists())
    }

    /// The allow-list as a content rule that cancels all earlier rules on
    /// allow-listed domains. `None` when the list is empty.
    pub fn as_rule(&self) -> Option<Value> {
        if self.domains.is_empty() {
            return None;
        }
        let if_domain: Vec<String> = self
            .domains
            .domains()
            .iter()
            .map(|domain| format!("*{}", domain))
            .collect();
        Some(json!({
            "action": { "type": "ignore-previous-rules" },
            "trigger": { "url-filter": ".*", "if-domain": if_domain }
        }))
    }

    /// JSON text of [`as_rule`](Self::as_rule), or an empty string.
    pub fn as_json_fragment(&self) -> String {
        self.as_rule().map(|rule| rule.to_string()).unwrap_or_default()
    }

    /// Write the current set to disk, logging failures.
    pub fn save(&self) {
        if let Err(e) = self.persist() {
            log::warn!("{}", e);
        }
    }

    fn persist(&self) -> Result<(), AllowListError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        if self.domains.is_empty() {
            return match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(AllowListError::Remove {
                    path: path.clone(),
                    source,
                }),
            };
        }

        let contents = self
            .domains
            .domains()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|source| AllowListError::Write {
                path: path.clone(),
                source,
            })
    }
}

fn read_domain_file(path: &Path) -> Result<BTreeSet<String>, AllowListError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(source) => {
            return Err(AllowListError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
