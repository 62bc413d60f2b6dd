//! Rule list lifecycle
//!
//! Keeps the compiled store in step with the bundled rule lists and the
//! allow-lists:
//!
//! 1. On startup, stale lists are purged (by bundle date, then by name) and
//!    every list missing from the store is compiled.
//! 2. When an allow-list changes, its dependent lists are dropped and
//!    recompiled with the new allow-list rule.
//! 3. Tabs reinstall the compiled lists they have enabled.
//!
//! Store operations are blocking and run on Tokio's blocking pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use cg_core::bundle::ResourceBundle;
use cg_core::types::{AllowListKind, BlocklistName};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::marker::{millis_since_epoch, MarkerStore, BLOCKER_FILE_DATE_KEY};
use crate::rules::synthesize_rule_list;
use crate::store::{CompiledRuleList, RuleStore, RuleStoreError};

/// Anything that can have compiled rule lists attached, typically a tab.
pub trait RuleListHost: Send + Sync {
    fn install_rule_list(&self, list: &CompiledRuleList);

    fn uninstall_all_rule_lists(&self);
}

/// Allow-list rules to splice into their dependent lists at compile time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllowListRules {
    rules: HashMap<AllowListKind, Value>,
}

impl AllowListRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the rule for `kind`.
    pub fn set(&mut self, kind: AllowListKind, rule: Option<Value>) {
        match rule {
            Some(rule) => {
                self.rules.insert(kind, rule);
            }
            None => {
                self.rules.remove(&kind);
            }
        }
    }

    pub fn get(&self, kind: AllowListKind) -> Option<&Value> {
        self.rules.get(&kind)
    }
}

/// Outcome of a compile pass. Each vector is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub compiled: Vec<BlocklistName>,
    pub already_installed: Vec<BlocklistName>,
    pub failed: Vec<BlocklistName>,
}

impl CompileReport {
    fn sort(&mut self) {
        self.compiled.sort();
        self.already_installed.sort();
        self.failed.sort();
    }
}

/// Run `f` on the blocking pool. Worker panics resume on the caller.
async fn run_blocking<T, F>(f: F) -> Result<T, RuleStoreError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(RuleStoreError::Cancelled),
    }
}

/// Read a bundled list and build its compile input.
///
/// # Panics
///
/// Panics if the list is missing from the bundle or is not a JSON array.
/// Bundled lists ship with the application, so either is a packaging defect.
pub fn load_rule_source(
    bundle: &dyn ResourceBundle,
    list: BlocklistName,
    allow_rule: Option<&Value>,
) -> String {
    let bundled = match bundle.read(list.filename()) {
        Ok(text) => text,
        Err(e) => panic!("bundled rule list {} is unavailable: {}", list, e),
    };
    match synthesize_rule_list(&bundled, allow_rule, list.is_cosmetic()) {
        Ok(source) => source,
        Err(e) => panic!("bundled rule list {} is malformed: {}", list, e),
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Drives compilation, purging and installation of the five rule lists.
#[derive(Clone)]
pub struct RuleListCompiler {
    store: Arc<dyn RuleStore>,
    bundle: Arc<dyn ResourceBundle>,
    markers: Arc<dyn MarkerStore>,
}

impl RuleListCompiler {
    pub fn new(
        store: Arc<dyn RuleStore>,
        bundle: Arc<dyn ResourceBundle>,
        markers: Arc<dyn MarkerStore>,
    ) -> Self {
        Self {
            store,
            bundle,
            markers,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn bundle(&self) -> &Arc<dyn ResourceBundle> {
        &self.bundle
    }

    /// Purge stale lists, then compile everything missing.
    pub async fn startup(&self, allow_rules: &AllowListRules) -> CompileReport {
        self.remove_old_lists_by_date().await;
        self.remove_old_lists_by_name().await;
        self.compile_lists_not_in_store(allow_rules).await
    }

    /// Newest modification date among the bundled lists.
    pub fn newest_bundle_date(&self) -> Option<SystemTime> {
        BlocklistName::ALL
            .iter()
            .filter_map(|list| self.bundle.modified(list.filename()))
            .max()
    }

    /// Purge the store if the bundle is newer than the stored marker.
    ///
    /// A missing marker counts as stale. The marker is updated after a purge.
    /// Returns whether a purge happened.
    pub async fn remove_old_lists_by_date(&self) -> bool {
        let bundle_date = match self.newest_bundle_date() {
            Some(date) => date,
            None => return false,
        };

        let stale = match self.markers.date(BLOCKER_FILE_DATE_KEY) {
            Some(marker) => millis_since_epoch(bundle_date) > millis_since_epoch(marker),
            None => true,
        };
        if !stale {
            return false;
        }

        log::info!("bundled rule lists changed, purging compiled store");
        self.remove_all_rules_in_store().await;
        if let Err(e) = self.markers.set_date(BLOCKER_FILE_DATE_KEY, bundle_date) {
            log::warn!("failed to update {} marker: {}", BLOCKER_FILE_DATE_KEY, e);
        }
        true
    }

    /// Purge the store if it holds any identifier that is not a known list.
    pub async fn remove_old_lists_by_name(&self) -> bool {
        let installed = self.installed_identifiers().await;
        let unknown: Vec<&String> = installed
            .iter()
            .filter(|id| BlocklistName::from_filename(id).is_none())
            .collect();
        if unknown.is_empty() {
            return false;
        }

        log::info!("compiled store holds unknown lists {:?}, purging", unknown);
        self.remove_all_rules_in_store().await;
        true
    }

    /// Remove every compiled list. Returns how many were removed.
    pub async fn remove_all_rules_in_store(&self) -> usize {
        let store = Arc::clone(&self.store);
        let removed = run_blocking(move || {
            let identifiers = store.available_identifiers()?;
            let mut removed = 0;
            for id in identifiers {
                match store.remove(&id) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("failed to remove compiled list {}: {}", id, e),
                }
            }
            Ok::<_, RuleStoreError>(removed)
        })
        .await
        .and_then(|result| result);

        match removed {
            Ok(removed) => {
                log::debug!("removed {} compiled lists", removed);
                removed
            }
            Err(e) => {
                log::error!("failed to purge compiled store: {}", e);
                0
            }
        }
    }

    /// Raw identifiers in the store. Errors are logged and read as empty.
    async fn installed_identifiers(&self) -> Vec<String> {
        let store = Arc::clone(&self.store);
        match run_blocking(move || store.available_identifiers())
            .await
            .and_then(|result| result)
        {
            Ok(identifiers) => identifiers,
            Err(e) => {
                log::error!("failed to list compiled store: {}", e);
                Vec::new()
            }
        }
    }

    /// Known lists currently in the store, sorted.
    pub async fn installed_lists(&self) -> Vec<BlocklistName> {
        let mut lists: Vec<BlocklistName> = self
            .installed_identifiers()
            .await
            .iter()
            .filter_map(|id| BlocklistName::from_filename(id))
            .collect();
        lists.sort();
        lists
    }

    /// Compile every list that is not yet in the store, concurrently.
    ///
    /// Returns once all compilations have finished. Compile failures are
    /// logged and reported; the failed list stays uninstalled.
    ///
    /// # Panics
    ///
    /// Propagates the panic of [`load_rule_source`] for broken bundles.
    pub async fn compile_lists_not_in_store(&self, allow_rules: &AllowListRules) -> CompileReport {
        let installed: HashSet<BlocklistName> = self.installed_lists().await.into_iter().collect();
        let mut report = CompileReport::default();
        let mut tasks = JoinSet::new();

        for list in BlocklistName::ALL {
            if installed.contains(&list) {
                report.already_installed.push(list);
                continue;
            }

            let store = Arc::clone(&self.store);
            let bundle = Arc::clone(&self.bundle);
            let allow_rule = allow_rules.get(list.allow_list_kind()).cloned();
            tasks.spawn_blocking(move || {
                let source = load_rule_source(bundle.as_ref(), list, allow_rule.as_ref());
                (list, store.compile(list.filename(), &source))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((list, Ok(compiled))) => {
                    log::info!("compiled {} ({} rules)", list, compiled.len());
                    report.compiled.push(list);
                }
                Ok((list, Err(e))) => {
                    log::error!("failed to compile {}: {}", list, e);
                    report.failed.push(list);
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => log::error!("compile task cancelled: {}", e),
            }
        }

        report.sort();
        report
    }

    /// Drop `lists` from the store and recompile whatever is missing.
    pub async fn invalidate_and_recompile(
        &self,
        lists: &[BlocklistName],
        allow_rules: &AllowListRules,
    ) -> CompileReport {
        let store = Arc::clone(&self.store);
        let lists_owned = lists.to_vec();
        let removal = run_blocking(move || {
            for list in lists_owned {
                match store.remove(list.filename()) {
                    Ok(()) | Err(RuleStoreError::NotFound(_)) => {}
                    Err(e) => log::warn!("failed to remove compiled list {}: {}", list, e),
                }
            }
        })
        .await;
        if let Err(e) = removal {
            log::error!("failed to invalidate {:?}: {}", lists, e);
        }

        self.compile_lists_not_in_store(allow_rules).await
    }

    /// Replace the lists installed on `host`.
    ///
    /// Always uninstalls first. When disabled nothing is installed. Lists that
    /// cannot be looked up are logged and skipped. Returns how many were
    /// installed.
    pub async fn reinstall<H: RuleListHost + ?Sized>(
        &self,
        host: &H,
        is_enabled: bool,
        lists: &[BlocklistName],
    ) -> usize {
        host.uninstall_all_rule_lists();
        if !is_enabled || lists.is_empty() {
            return 0;
        }

        let store = Arc::clone(&self.store);
        let lists_owned = lists.to_vec();
        let lookups = run_blocking(move || {
            lists_owned
                .into_iter()
                .map(|list| (list, store.lookup(list.filename())))
                .collect::<Vec<_>>()
        })
        .await;

        let lookups = match lookups {
            Ok(lookups) => lookups,
            Err(e) => {
                log::error!("rule list lookup failed: {}", e);
                return 0;
            }
        };

        let mut installed = 0;
        for (list, lookup) in lookups {
            match lookup {
                Ok(compiled) => {
                    host.install_rule_list(&compiled);
                    installed += 1;
                }
                Err(e) => log::warn!("cannot install {}: {}", list, e),
            }
        }
        installed
    }
}
