//! Compiled rule store
//!
//! The store caches compiled rule lists by identifier so they survive
//! restarts. It is a single process-wide resource shared by every tab.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::rules::{parse_rule_list, ContentRule, RuleError};

/// Error type for compiled store operations.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("rule list '{0}' is not in the store")]
    NotFound(String),
    #[error("rule list '{identifier}' failed to compile: {source}")]
    Compile { identifier: String, source: RuleError },
    #[error("rule list '{identifier}' is corrupt: {source}")]
    Corrupt {
        identifier: String,
        source: serde_json::Error,
    },
    #[error("rule store I/O error for '{identifier}': {source}")]
    Io { identifier: String, source: io::Error },
    #[error("rule store task was cancelled")]
    Cancelled,
}

/// A compiled, validated rule list.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRuleList {
    identifier: String,
    rules: Arc<Vec<ContentRule>>,
}

impl CompiledRuleList {
    pub fn new(identifier: impl Into<String>, rules: Vec<ContentRule>) -> Self {
        Self {
            identifier: identifier.into(),
            rules: Arc::new(rules),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn rules(&self) -> &[ContentRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Content-filtering engine's compiled rule cache.
///
/// Operations are blocking; callers run them on blocking workers.
pub trait RuleStore: Send + Sync {
    /// Compile `source` and store the result under `identifier`.
    fn compile(&self, identifier: &str, source: &str) -> Result<CompiledRuleList, RuleStoreError>;

    /// Fetch a previously compiled list.
    fn lookup(&self, identifier: &str) -> Result<CompiledRuleList, RuleStoreError>;

    /// Identifiers of every compiled list.
    fn available_identifiers(&self) -> Result<Vec<String>, RuleStoreError>;

    /// Drop a compiled list.
    fn remove(&self, identifier: &str) -> Result<(), RuleStoreError>;
}

fn compile_source(identifier: &str, source: &str) -> Result<CompiledRuleList, RuleStoreError> {
    let rules = parse_rule_list(source).map_err(|source| RuleStoreError::Compile {
        identifier: identifier.to_string(),
        source,
    })?;
    Ok(CompiledRuleList::new(identifier, rules))
}

// =============================================================================
// Directory Store
// =============================================================================

/// Stores each compiled list as normalized JSON in `<dir>/<identifier>.json`.
#[derive(Debug, Clone)]
pub struct DirRuleStore {
    dir: PathBuf,
}

impl DirRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{}.json", identifier))
    }

    fn io_error(identifier: &str) -> impl FnOnce(io::Error) -> RuleStoreError + '_ {
        move |source| RuleStoreError::Io {
            identifier: identifier.to_string(),
            source,
        }
    }
}

impl RuleStore for DirRuleStore {
    fn compile(&self, identifier: &str, source: &str) -> Result<CompiledRuleList, RuleStoreError> {
        let compiled = compile_source(identifier, source)?;

        let normalized = serde_json::to_string(compiled.rules()).map_err(|source| {
            RuleStoreError::Corrupt {
                identifier: identifier.to_string(),
                source,
            }
        })?;

        fs::create_dir_all(&self.dir).map_err(Self::io_error(identifier))?;
        let path = self.path_for(identifier);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, normalized)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(Self::io_error(identifier))?;

        Ok(compiled)
    }

    fn lookup(&self, identifier: &str) -> Result<CompiledRuleList, RuleStoreError> {
        let text = match fs::read_to_string(self.path_for(identifier)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RuleStoreError::NotFound(identifier.to_string()))
            }
            Err(e) => return Err(Self::io_error(identifier)(e)),
        };

        let rules: Vec<ContentRule> =
            serde_json::from_str(&text).map_err(|source| RuleStoreError::Corrupt {
                identifier: identifier.to_string(),
                source,
            })?;
        Ok(CompiledRuleList::new(identifier, rules))
    }

    fn available_identifiers(&self) -> Result<Vec<String>, RuleStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error("*")(e)),
        };

        let mut identifiers = Vec::new();
        for entry in entries {
            let path = entry.map_err(Self::io_error("*"))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                identifiers.push(stem.to_string());
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    fn remove(&self, identifier: &str) -> Result<(), RuleStoreError> {
        match fs::remove_file(self.path_for(identifier)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RuleStoreError::NotFound(identifier.to_string()))
            }
            Err(e) => Err(Self::io_error(identifier)(e)),
        }
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory store. Counts compilations, which tests use to observe work.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    lists: RwLock<HashMap<String, CompiledRuleList>>,
    compile_count: AtomicUsize,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful compilations so far.
    pub fn compile_count(&self) -> usize {
        self.compile_count.load(Ordering::SeqCst)
    }
}

impl RuleStore for MemoryRuleStore {
    fn compile(&self, identifier: &str, source: &str) -> Result<CompiledRuleList, RuleStoreError> {
        let compiled = compile_source(identifier, source)?;
        if let Ok(mut lists) = self.lists.write() {
            lists.insert(identifier.to_string(), compiled.clone());
        }
        self.compile_count.fetch_add(1, Ordering::SeqCst);
        Ok(compiled)
    }

    fn lookup(&self, identifier: &str) -> Result<CompiledRuleList, RuleStoreError> {
        self.lists
            .read()
            .ok()
            .and_then(|lists| lists.get(identifier).cloned())
            .ok_or_else(|| RuleStoreError::NotFound(identifier.to_string()))
    }

    fn available_identifiers(&self) -> Result<Vec<String>, RuleStoreError> {
        let mut identifiers: Vec<String> = self
            .lists
            .read()
            .map(|lists| lists.keys().cloned().collect())
            .unwrap_or_default();
        identifiers.sort();
        Ok(identifiers)
    }

    fn remove(&self, identifier: &str) -> Result<(), RuleStoreError> {
        let removed = self
            .lists
            .write()
            .ok()
            .and_then(|mut lists| lists.remove(identifier));
        match removed {
            Some(_) => Ok(()),
            None => Err(RuleStoreError::NotFound(identifier.to_string())),
        }
    }
}
