//! Content blocker service
//!
//! One [`ContentBlocker`] per process, shared behind an `Arc`. It owns the
//! three allow-lists, the tracker database and the rule list compiler, and
//! broadcasts [`BlockerEvent`]s to the tabs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cg_compiler::lifecycle::{AllowListRules, CompileReport, RuleListCompiler, RuleListHost};
use cg_compiler::marker::{JsonMarkerStore, MarkerStore};
use cg_compiler::store::{DirRuleStore, RuleStore};
use cg_core::allowlist::AllowListStore;
use cg_core::bundle::{DirBundle, ResourceBundle};
use cg_core::psl::init_psl;
use cg_core::tracker_db::{Classification, TrackerDatabase};
use cg_core::types::{AllowListKind, BlocklistName};
use tokio::sync::{broadcast, Mutex};

use crate::config::BlockerConfig;
use crate::events::{BlockerEvent, EventBus, TabId};
use crate::tab::{ContentBlockerTab, TabContentBlocker, TabSettings};

/// The process-wide content blocker.
pub struct ContentBlocker {
    config: BlockerConfig,
    allow_lists: HashMap<AllowListKind, RwLock<AllowListStore>>,
    tracker_db: TrackerDatabase,
    bundle: Arc<dyn ResourceBundle>,
    compiler: RuleListCompiler,
    events: EventBus,
    setup_completed: AtomicBool,
    // Serializes allow-list recompiles so the last edit is compiled last
    recompile: Mutex<()>,
}

impl ContentBlocker {
    /// Build a blocker over explicit collaborators.
    ///
    /// Allow-lists are loaded synchronously from `config.documents_dir`.
    pub fn new(
        config: BlockerConfig,
        bundle: Arc<dyn ResourceBundle>,
        store: Arc<dyn RuleStore>,
        markers: Arc<dyn MarkerStore>,
    ) -> Self {
        let allow_lists = AllowListKind::ALL
            .iter()
            .map(|&kind| {
                let store = AllowListStore::open(kind, &config.documents_dir);
                (kind, RwLock::new(store))
            })
            .collect();

        let compiler = RuleListCompiler::new(store, Arc::clone(&bundle), markers);

        Self {
            config,
            allow_lists,
            tracker_db: TrackerDatabase::new(),
            bundle,
            compiler,
            events: EventBus::new(),
            setup_completed: AtomicBool::new(false),
            recompile: Mutex::new(()),
        }
    }

    /// Build a blocker backed by the directories named in `config`.
    pub fn from_config(config: BlockerConfig) -> Self {
        let bundle = Arc::new(DirBundle::new(&config.resources_dir));
        let store = Arc::new(DirRuleStore::new(&config.store_dir));
        let markers = Arc::new(JsonMarkerStore::open(&config.marker_path));
        Self::new(config, bundle, store, markers)
    }

    pub fn config(&self) -> &BlockerConfig {
        &self.config
    }

    pub fn tracker_db(&self) -> &TrackerDatabase {
        &self.tracker_db
    }

    pub fn compiler(&self) -> &RuleListCompiler {
        &self.compiler
    }

    fn allow_list(&self, kind: AllowListKind) -> RwLockReadGuard<'_, AllowListStore> {
        match self.allow_lists.get(&kind) {
            Some(lock) => lock.read().unwrap_or_else(PoisonError::into_inner),
            None => unreachable!("allow-list {} is always present", kind.as_str()),
        }
    }

    fn allow_list_mut(&self, kind: AllowListKind) -> RwLockWriteGuard<'_, AllowListStore> {
        match self.allow_lists.get(&kind) {
            Some(lock) => lock.write().unwrap_or_else(PoisonError::into_inner),
            None => unreachable!("allow-list {} is always present", kind.as_str()),
        }
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Load the tracker database, bring the compiled store up to date, then
    /// announce readiness.
    ///
    /// `SetupCompleted` and `SetupRequired` are emitted only after every rule
    /// list compilation has finished.
    pub async fn start(&self) -> CompileReport {
        if let Some(path) = &self.config.psl_path {
            load_public_suffix_list(path);
        }

        let db_load = self
            .tracker_db
            .startup(Arc::clone(&self.bundle), &self.config.tracker_db_resource);

        let report = {
            let _guard = self.recompile.lock().await;
            self.compiler.startup(&self.allow_list_rules()).await
        };
        if !report.failed.is_empty() {
            log::warn!("rule lists failed to compile: {:?}", report.failed);
        }

        if let Err(e) = db_load.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            log::error!("tracker database load task cancelled: {}", e);
        }

        self.setup_completed.store(true, Ordering::SeqCst);
        log::info!(
            "content blocker ready: {} rule lists compiled, {} tracker domains",
            report.compiled.len() + report.already_installed.len(),
            self.tracker_db.len()
        );
        self.events.emit(BlockerEvent::SetupCompleted);
        self.events.emit(BlockerEvent::SetupRequired);
        report
    }

    pub fn is_setup_completed(&self) -> bool {
        self.setup_completed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Classify `url`, net of the ads and tracking allow-lists.
    pub fn classify(&self, url: &str) -> Classification {
        let mut allow_list_regex = self.allow_list(AllowListKind::Ads).domain_regex().to_vec();
        allow_list_regex.extend_from_slice(self.allow_list(AllowListKind::Tracking).domain_regex());
        self.tracker_db.classify(url, allow_list_regex)
    }

    // =========================================================================
    // Allow-lists
    // =========================================================================

    pub fn is_allow_listed(&self, kind: AllowListKind, url: &str) -> bool {
        self.allow_list(kind).is_allow_listed(url)
    }

    /// Allow-listed domains of `kind`, sorted.
    pub fn allow_list_domains(&self, kind: AllowListKind) -> Vec<String> {
        self.allow_list(kind).domains().domains().iter().cloned().collect()
    }

    /// Current allow-list rules of all kinds.
    pub fn allow_list_rules(&self) -> AllowListRules {
        let mut rules = AllowListRules::new();
        for kind in AllowListKind::ALL {
            rules.set(kind, self.allow_list(kind).as_rule());
        }
        rules
    }

    /// Add or remove the host of `url` on the `kind` allow-list.
    ///
    /// Resolves once the dependent rule lists have been recompiled, after
    /// which tabs are told to reinstall. Returns `false` without doing
    /// anything when `url` has no host.
    pub async fn set_allow_listed(&self, kind: AllowListKind, enabled: bool, url: &str) -> bool {
        let changed = self.allow_list_mut(kind).set_allow_listed(enabled, url);
        let lists = match changed {
            Some(lists) => lists,
            None => {
                log::debug!("ignoring allow-list change for host-less url {}", url);
                return false;
            }
        };

        let report = {
            let _guard = self.recompile.lock().await;
            self.compiler
                .invalidate_and_recompile(lists, &self.allow_list_rules())
                .await
        };
        if !report.failed.is_empty() {
            log::warn!("rule lists failed to recompile: {:?}", report.failed);
        }

        self.events.emit(BlockerEvent::SetupRequired);
        true
    }

    // =========================================================================
    // Tabs
    // =========================================================================

    /// Replace the rule lists installed on `host`.
    pub async fn reinstall_rules<H: RuleListHost + ?Sized>(
        &self,
        host: &H,
        is_enabled: bool,
        lists: &[BlocklistName],
    ) -> usize {
        self.compiler.reinstall(host, is_enabled, lists).await
    }

    /// Ask every tab to reinstall its rule lists.
    pub fn prefs_changed(&self) {
        self.events.emit(BlockerEvent::SetupRequired);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: BlockerEvent) {
        self.events.emit(event);
    }

    /// Create the blocker for one tab.
    pub fn tab(
        self: &Arc<Self>,
        id: TabId,
        tab: Arc<dyn ContentBlockerTab>,
        settings: TabSettings,
    ) -> TabContentBlocker {
        TabContentBlocker::new(Arc::clone(self), id, tab, settings)
    }
}

fn load_public_suffix_list(path: &Path) {
    match fs::read_to_string(path) {
        Ok(text) => match init_psl(&text) {
            Ok(()) => log::info!("loaded public suffix list from {}", path.display()),
            Err(e) => log::warn!("invalid public suffix list {}: {}", path.display(), e),
        },
        Err(e) => log::warn!("failed to read public suffix list {}: {}", path.display(), e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cg_compiler::marker::MemoryMarkerStore;
    use cg_compiler::store::MemoryRuleStore;
    use cg_core::bundle::MemoryBundle;
    use cg_core::tracker_db::TRACKER_DB_RESOURCE;
    use cg_core::types::{Tracker, WtmCategory};

    pub(crate) const TRACKER_DB: &str = r#"{
        "apps": {
            "A1": { "cat": "advertising" },
            "A2": { "cat": "site_analytics" }
        },
        "domains": {
            "ads.biz": "A1",
            "example.com": "A1",
            "xiti.com": "A2"
        }
    }"#;

    pub(crate) fn bundle() -> Arc<MemoryBundle> {
        let bundle = MemoryBundle::new();
        for list in BlocklistName::ALL {
            let rules = if list.is_cosmetic() {
                r#"[{"trigger": {"url-filter": ".*"}, "action": {"type": "css-display-none", "selector": ".ad"}}]"#
            } else {
                r#"[{"trigger": {"url-filter": "ads\\.biz"}, "action": {"type": "block"}}]"#
            };
            bundle.insert(list.filename(), rules);
        }
        bundle.insert(TRACKER_DB_RESOURCE, TRACKER_DB);
        Arc::new(bundle)
    }

    pub(crate) fn test_blocker(documents: &Path) -> (Arc<ContentBlocker>, Arc<MemoryRuleStore>) {
        let config = BlockerConfig::with_root("unused", documents);
        let store = Arc::new(MemoryRuleStore::new());
        let blocker = ContentBlocker::new(
            config,
            bundle(),
            store.clone(),
            Arc::new(MemoryMarkerStore::new()),
        );
        (Arc::new(blocker), store)
    }

    #[tokio::test]
    async fn test_start_compiles_before_announcing() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, store) = test_blocker(dir.path());
        let mut events = blocker.subscribe();
        assert!(!blocker.is_setup_completed());

        let report = blocker.start().await;
        assert_eq!(report.compiled.len(), 5);
        assert_eq!(store.available_identifiers().unwrap().len(), 5);
        assert!(blocker.is_setup_completed());
        assert!(blocker.tracker_db().is_ready());

        assert_eq!(events.recv().await.unwrap(), BlockerEvent::SetupCompleted);
        assert_eq!(events.recv().await.unwrap(), BlockerEvent::SetupRequired);
    }

    #[tokio::test]
    async fn test_classify_respects_ads_and_tracking_allow_lists() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        assert_eq!(
            blocker.classify("https://cdn.ads.biz/pixel.gif").await,
            Some(Tracker::new(WtmCategory::Advertising, "A1"))
        );

        assert!(blocker.set_allow_listed(AllowListKind::Tracking, true, "https://xiti.com/").await);
        assert_eq!(blocker.classify("https://www.xiti.com/hit").await, None);

        blocker.set_allow_listed(AllowListKind::Ads, true, "https://ads.biz/").await;
        assert_eq!(blocker.classify("https://cdn.ads.biz/pixel.gif").await, None);

        // Popups allow-listing does not affect classification.
        blocker.set_allow_listed(AllowListKind::Popups, true, "https://example.com/").await;
        assert!(blocker.classify("https://example.com/x").await.is_some());
    }

    #[tokio::test]
    async fn test_set_allow_listed_recompiles_dependent_list() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, store) = test_blocker(dir.path());
        blocker.start().await;
        let mut events = blocker.subscribe();

        assert!(blocker.set_allow_listed(AllowListKind::Tracking, true, "https://news.com/a").await);
        assert_eq!(store.compile_count(), 6);
        assert_eq!(events.recv().await.unwrap(), BlockerEvent::SetupRequired);

        let tracking = store.lookup("safari-tracking-network").unwrap();
        let last = tracking.rules().last().unwrap();
        assert_eq!(last.trigger.if_domain, Some(vec!["*news.com".to_string()]));

        assert!(blocker.is_allow_listed(AllowListKind::Tracking, "http://news.com/other"));
        assert_eq!(blocker.allow_list_domains(AllowListKind::Tracking), vec!["news.com"]);
        assert!(dir.path().join("whitelist").exists());

        assert!(blocker.set_allow_listed(AllowListKind::Tracking, false, "https://news.com/").await);
        assert!(!dir.path().join("whitelist").exists());
        let tracking = store.lookup("safari-tracking-network").unwrap();
        assert!(tracking.rules().iter().all(|r| r.trigger.if_domain.is_none()));
    }

    #[tokio::test]
    async fn test_host_less_url_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, store) = test_blocker(dir.path());
        blocker.start().await;

        assert!(!blocker.set_allow_listed(AllowListKind::Ads, true, "about:blank").await);
        assert_eq!(store.compile_count(), 5);
        assert!(blocker.allow_list_domains(AllowListKind::Ads).is_empty());
    }

    #[tokio::test]
    async fn test_allow_lists_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (blocker, _) = test_blocker(dir.path());
            blocker.set_allow_listed(AllowListKind::Ads, true, "https://a.com").await;
            blocker.set_allow_listed(AllowListKind::Ads, true, "https://b.com").await;
        }
        let (blocker, store) = test_blocker(dir.path());
        assert_eq!(blocker.allow_list_domains(AllowListKind::Ads), vec!["a.com", "b.com"]);

        blocker.start().await;
        let ads = store.lookup("safari-ads-network").unwrap();
        let last = ads.rules().last().unwrap();
        assert_eq!(
            last.trigger.if_domain,
            Some(vec!["*a.com".to_string(), "*b.com".to_string()])
        );
    }

    #[tokio::test]
    async fn test_prefs_changed_requests_setup() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        let mut events = blocker.subscribe();
        blocker.prefs_changed();
        assert_eq!(events.recv().await.unwrap(), BlockerEvent::SetupRequired);
    }
}
