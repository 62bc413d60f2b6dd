//! Per-tab content blocking
//!
//! A [`TabContentBlocker`] installs the rule lists a tab has enabled, counts
//! the trackers its page reports, and derives the tab's [`BlockerStatus`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use cg_compiler::lifecycle::RuleListHost;
use cg_core::stats::{blocker_status, PageStats, StatusInputs};
use cg_core::types::{AllowListKind, BlockerStatus, BlocklistName, Tracker};
use cg_core::url::with_http_scheme;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::blocker::ContentBlocker;
use crate::events::{BlockerEvent, TabId};

/// What the blocker needs from a browser tab.
pub trait ContentBlockerTab: RuleListHost {
    /// URL of the page currently shown, if any.
    fn current_url(&self) -> Option<String>;
}

/// Per-tab feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabSettings {
    pub ad_blocking: bool,
    pub anti_tracking: bool,
    pub popup_blocking: bool,
    /// Accept tracker reports from the page
    pub privacy_dashboard: bool,
}

impl Default for TabSettings {
    fn default() -> Self {
        Self {
            ad_blocking: true,
            anti_tracking: true,
            popup_blocking: false,
            privacy_dashboard: true,
        }
    }
}

impl TabSettings {
    /// Ad blocking or anti-tracking is on.
    pub fn is_enabled(&self) -> bool {
        self.ad_blocking || self.anti_tracking
    }

    /// Rule lists to install for these settings.
    pub fn enabled_lists(&self) -> Vec<BlocklistName> {
        let mut lists = Vec::new();
        if self.ad_blocking {
            lists.extend_from_slice(AllowListKind::Ads.dependent_lists());
        }
        if self.anti_tracking {
            lists.extend_from_slice(AllowListKind::Tracking.dependent_lists());
        }
        if self.popup_blocking {
            lists.extend_from_slice(AllowListKind::Popups.dependent_lists());
        }
        lists
    }
}

pub struct TabContentBlocker {
    blocker: Arc<ContentBlocker>,
    id: TabId,
    tab: Arc<dyn ContentBlockerTab>,
    settings: RwLock<TabSettings>,
    stats: Mutex<PageStats>,
    /// Bumped whenever the stats are reset for a new page
    page_load: AtomicU64,
}

impl TabContentBlocker {
    pub fn new(
        blocker: Arc<ContentBlocker>,
        id: TabId,
        tab: Arc<dyn ContentBlockerTab>,
        settings: TabSettings,
    ) -> Self {
        Self {
            blocker,
            id,
            tab,
            settings: RwLock::new(settings),
            stats: Mutex::new(PageStats::new()),
            page_load: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn settings(&self) -> TabSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the settings. Takes effect for rules on the next
    /// [`setup_for_tab`](Self::setup_for_tab).
    pub fn set_settings(&self, settings: TabSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn enabled_lists(&self) -> Vec<BlocklistName> {
        self.settings().enabled_lists()
    }

    fn lock_stats(&self) -> MutexGuard<'_, PageStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Rule Installation
    // =========================================================================

    /// Reinstall the enabled rule lists on the tab.
    pub async fn setup_for_tab(&self) -> usize {
        let settings = self.settings();
        self.blocker
            .reinstall_rules(&*self.tab, settings.is_enabled(), &settings.enabled_lists())
            .await
    }

    /// Handle a blocker event addressed to all tabs.
    pub async fn handle_event(&self, event: BlockerEvent) {
        if event == BlockerEvent::SetupRequired {
            self.setup_for_tab().await;
        }
    }

    /// Reinstall rules whenever the blocker asks for it.
    ///
    /// The task only holds a weak reference to the tab blocker. It ends when
    /// the event channel closes, or at the next event after the last
    /// `Arc<TabContentBlocker>` is dropped.
    pub fn spawn_setup_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let id = self.id;
        let mut events = self.blocker.subscribe();
        tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(this) = weak.upgrade() else {
                    log::debug!("tab {} dropped, stopping setup listener", id);
                    break;
                };
                match received {
                    Ok(event) => this.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        log::debug!("tab {} missed {} events, reinstalling", id, missed);
                        this.setup_for_tab().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // =========================================================================
    // Page Stats
    // =========================================================================

    /// Handle a tracker report from the page: `{"url": "<resource url>"}`.
    ///
    /// Returns the tracker that was counted, if any. A result that arrives
    /// after the stats were cleared for a new page is dropped.
    pub async fn handle_message(&self, payload: &Value) -> Option<Tracker> {
        if !self.settings().privacy_dashboard {
            return None;
        }
        let resource_url = payload.get("url")?.as_str()?;
        let page_url = self.tab.current_url()?;

        if self.blocker.is_allow_listed(AllowListKind::Ads, &page_url)
            && self.blocker.is_allow_listed(AllowListKind::Tracking, &page_url)
        {
            self.clear_page_stats();
            return None;
        }

        let resource_url = with_http_scheme(resource_url)?;
        let page_load = self.page_load();
        let tracker = self.blocker.classify(&resource_url).await?;

        if !self.record_tracker(page_load, &tracker) {
            log::debug!("tab {} navigated, dropping tracker {}", self.id, tracker.id);
            return None;
        }
        self.blocker.emit(BlockerEvent::StatsChanged { tab: self.id });
        Some(tracker)
    }

    fn page_load(&self) -> u64 {
        self.page_load.load(Ordering::Acquire)
    }

    /// Count `tracker` if the stats still belong to `page_load`.
    fn record_tracker(&self, page_load: u64, tracker: &Tracker) -> bool {
        let mut stats = self.lock_stats();
        if self.page_load() != page_load {
            return false;
        }
        stats.update(tracker.clone());
        true
    }

    /// Reset stats, typically on navigation. Classifications still in flight
    /// for the previous page are not counted.
    pub fn clear_page_stats(&self) {
        {
            let mut stats = self.lock_stats();
            self.page_load.fetch_add(1, Ordering::AcqRel);
            *stats = PageStats::new();
        }
        self.blocker.emit(BlockerEvent::StatsChanged { tab: self.id });
    }

    pub fn stats(&self) -> PageStats {
        self.lock_stats().clone()
    }

    pub fn status(&self) -> BlockerStatus {
        let settings = self.settings();
        let url = self.tab.current_url();
        let allow_listed = |enabled: bool, kind: AllowListKind| match &url {
            Some(url) => enabled && self.blocker.is_allow_listed(kind, url),
            None => false,
        };

        blocker_status(StatusInputs {
            enabled: settings.is_enabled(),
            has_url: url.is_some(),
            ad_allow_listed: allow_listed(settings.ad_blocking, AllowListKind::Ads),
            tracking_allow_listed: allow_listed(settings.anti_tracking, AllowListKind::Tracking),
            total: self.lock_stats().total(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::tests::test_blocker;
    use cg_compiler::store::CompiledRuleList;
    use cg_core::types::WtmCategory;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct TestTab {
        url: Mutex<Option<String>>,
        installed: Mutex<Vec<String>>,
        setups: Mutex<usize>,
    }

    impl TestTab {
        fn at(url: &str) -> Arc<Self> {
            let tab = Self::default();
            *tab.url.lock().unwrap() = Some(url.to_string());
            Arc::new(tab)
        }
    }

    impl RuleListHost for TestTab {
        fn install_rule_list(&self, list: &CompiledRuleList) {
            self.installed.lock().unwrap().push(list.identifier().to_string());
        }

        fn uninstall_all_rule_lists(&self) {
            self.installed.lock().unwrap().clear();
            *self.setups.lock().unwrap() += 1;
        }
    }

    impl ContentBlockerTab for TestTab {
        fn current_url(&self) -> Option<String> {
            self.url.lock().unwrap().clone()
        }
    }

    fn report(url: &str) -> Value {
        json!({ "url": url })
    }

    #[test]
    fn test_enabled_lists() {
        let all = TabSettings {
            popup_blocking: true,
            ..TabSettings::default()
        };
        assert_eq!(all.enabled_lists().len(), 5);

        let tracking_only = TabSettings {
            ad_blocking: false,
            ..TabSettings::default()
        };
        assert_eq!(tracking_only.enabled_lists(), vec![BlocklistName::TrackingNetwork]);
        assert!(tracking_only.is_enabled());

        let none = TabSettings {
            ad_blocking: false,
            anti_tracking: false,
            popup_blocking: true,
            privacy_dashboard: true,
        };
        assert!(!none.is_enabled());
    }

    #[tokio::test]
    async fn test_setup_for_tab_installs_enabled_lists() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let tab = TestTab::at("https://news.com/");
        let tab_blocker = blocker.tab(1, tab.clone(), TabSettings::default());
        assert_eq!(tab_blocker.setup_for_tab().await, 3);
        assert_eq!(
            *tab.installed.lock().unwrap(),
            vec!["safari-ads-network", "safari-ads-cosmetic", "safari-tracking-network"]
        );

        tab_blocker.set_settings(TabSettings {
            ad_blocking: false,
            anti_tracking: false,
            popup_blocking: true,
            privacy_dashboard: true,
        });
        assert_eq!(tab_blocker.setup_for_tab().await, 0);
        assert!(tab.installed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_reports_drive_status() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let tab = TestTab::at("https://news.com/article");
        let tab_blocker = blocker.tab(1, tab.clone(), TabSettings::default());
        assert_eq!(tab_blocker.status(), BlockerStatus::NoBlockedURLs);

        let tracker = tab_blocker.handle_message(&report("https://ads.biz/img.png")).await;
        assert_eq!(tracker.map(|t| t.category), Some(WtmCategory::Advertising));
        assert!(tab_blocker.handle_message(&report("https://fonts.dev/a.woff")).await.is_none());

        let stats = tab_blocker.stats();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.ad_count(), 1);
        assert_eq!(tab_blocker.status(), BlockerStatus::Blocking);

        blocker
            .set_allow_listed(AllowListKind::Tracking, true, "https://news.com/")
            .await;
        assert_eq!(tab_blocker.status(), BlockerStatus::AntiTrackingAllowListed);

        blocker.set_allow_listed(AllowListKind::Ads, true, "https://news.com/").await;
        assert_eq!(tab_blocker.status(), BlockerStatus::AdBlockAllowListed);

        // Fully allow-listed page: the next report clears the stats.
        assert!(tab_blocker.handle_message(&report("https://ads.biz/img.png")).await.is_none());
        assert_eq!(tab_blocker.stats().total(), 0);
        assert_eq!(tab_blocker.status(), BlockerStatus::AllowListed);
    }

    #[tokio::test]
    async fn test_allow_listing_ignored_for_disabled_features() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;
        blocker.set_allow_listed(AllowListKind::Ads, true, "https://news.com/").await;

        let settings = TabSettings {
            ad_blocking: false,
            ..TabSettings::default()
        };
        let tab_blocker = blocker.tab(2, TestTab::at("https://news.com/"), settings);
        tab_blocker.handle_message(&report("http://xiti.com/hit")).await;
        assert_eq!(tab_blocker.status(), BlockerStatus::Blocking);
    }

    #[tokio::test]
    async fn test_messages_ignored_without_context() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let no_page = blocker.tab(1, Arc::new(TestTab::default()), TabSettings::default());
        assert!(no_page.handle_message(&report("https://ads.biz/x")).await.is_none());
        assert_eq!(no_page.status(), BlockerStatus::NoBlockedURLs);

        let tab = TestTab::at("https://news.com/");
        let dashboard_off = blocker.tab(
            2,
            tab.clone(),
            TabSettings {
                privacy_dashboard: false,
                ..TabSettings::default()
            },
        );
        assert!(dashboard_off.handle_message(&report("https://ads.biz/x")).await.is_none());

        let tab_blocker = blocker.tab(3, tab, TabSettings::default());
        assert!(tab_blocker.handle_message(&json!({ "href": "https://ads.biz" })).await.is_none());
        assert!(tab_blocker.handle_message(&report("about:blank")).await.is_none());
        assert_eq!(tab_blocker.stats().total(), 0);
    }

    #[tokio::test]
    async fn test_stats_changes_are_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;
        let mut events = blocker.subscribe();

        let tab_blocker = blocker.tab(9, TestTab::at("https://news.com/"), TabSettings::default());
        tab_blocker.handle_message(&report("https://xiti.com/hit")).await;
        assert_eq!(events.recv().await.unwrap(), BlockerEvent::StatsChanged { tab: 9 });

        tab_blocker.clear_page_stats();
        assert_eq!(events.recv().await.unwrap(), BlockerEvent::StatsChanged { tab: 9 });
        assert_eq!(tab_blocker.stats().total(), 0);
    }

    #[tokio::test]
    async fn test_setup_listener_reinstalls_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let tab = TestTab::at("https://news.com/");
        let tab_blocker = Arc::new(blocker.tab(1, tab.clone(), TabSettings::default()));
        let listener = tab_blocker.spawn_setup_listener();

        blocker.prefs_changed();
        tokio::time::timeout(Duration::from_secs(5), async {
            while tab.installed.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("tab was not set up");
        assert_eq!(*tab.setups.lock().unwrap(), 1);

        listener.abort();
    }

    #[tokio::test]
    async fn test_setup_listener_ends_with_its_owners() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        let tab_blocker = Arc::new(blocker.tab(1, TestTab::at("https://news.com/"), TabSettings::default()));
        let listener = tab_blocker.spawn_setup_listener();

        drop(tab_blocker);
        drop(blocker);
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener outlived the blocker")
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_listener_stops_after_tab_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let tab = TestTab::at("https://news.com/");
        let tab_blocker = Arc::new(blocker.tab(1, tab.clone(), TabSettings::default()));
        let listener = tab_blocker.spawn_setup_listener();

        drop(tab_blocker);
        blocker.prefs_changed();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener kept running for a dropped tab")
            .unwrap();
        assert_eq!(*tab.setups.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_navigation_drops_in_flight_trackers() {
        let dir = tempfile::tempdir().unwrap();
        let (blocker, _) = test_blocker(dir.path());
        blocker.start().await;

        let tab = TestTab::at("https://old.com/");
        let tab_blocker = blocker.tab(1, tab.clone(), TabSettings::default());
        let tracker = Tracker::new(WtmCategory::Advertising, "A1");

        // Classification started on the old page, finished after navigation
        let old_load = tab_blocker.page_load();
        *tab.url.lock().unwrap() = Some("https://new.com/".to_string());
        tab_blocker.clear_page_stats();
        assert!(!tab_blocker.record_tracker(old_load, &tracker));
        assert_eq!(tab_blocker.stats().total(), 0);
        assert_eq!(tab_blocker.status(), BlockerStatus::NoBlockedURLs);

        let new_load = tab_blocker.page_load();
        assert_ne!(old_load, new_load);
        assert!(tab_blocker.record_tracker(new_load, &tracker));
        assert_eq!(tab_blocker.stats().total(), 1);

        // Reports on the new page still count through the full path
        assert!(tab_blocker.handle_message(&report("https://xiti.com/hit")).await.is_some());
        assert_eq!(tab_blocker.stats().total(), 2);
    }
}
