//! Per-page tracker statistics and the derived blocker status.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::{BlockerStatus, Tracker, WtmCategory};

// =============================================================================
// Page Stats
// =============================================================================

/// Tracker hits accumulated during one page load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageStats {
    counts: [usize; WtmCategory::COUNT],
    trackers: HashSet<Tracker>,
}

impl PageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classified tracker hit.
    ///
    /// The tracker set deduplicates, but the category counter is incremented
    /// on every call, so a resource reported twice is counted twice.
    pub fn update(&mut self, tracker: Tracker) {
        self.counts[tracker.category.index()] += 1;
        self.trackers.insert(tracker);
    }

    /// Hits recorded for one category.
    pub fn count(&self, category: WtmCategory) -> usize {
        self.counts[category.index()]
    }

    pub fn ad_count(&self) -> usize {
        self.count(WtmCategory::Advertising)
    }

    pub fn analytic_count(&self) -> usize {
        self.count(WtmCategory::Analytics)
    }

    pub fn social_count(&self) -> usize {
        self.count(WtmCategory::Social)
    }

    /// Sum of all category counters.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Distinct trackers seen on this page.
    pub fn trackers(&self) -> &HashSet<Tracker> {
        &self.trackers
    }

    /// Non-zero counters in category order.
    pub fn by_category(&self) -> Vec<(WtmCategory, usize)> {
        WtmCategory::ALL
            .iter()
            .map(|&category| (category, self.count(category)))
            .filter(|&(_, count)| count > 0)
            .collect()
    }
}

// =============================================================================
// Blocker Status
// =============================================================================

/// Inputs of the blocker status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusInputs {
    /// Ad blocking or anti-tracking is enabled
    pub enabled: bool,
    /// The tab has a current page URL
    pub has_url: bool,
    pub ad_allow_listed: bool,
    pub tracking_allow_listed: bool,
    /// `PageStats::total` of the current page
    pub total: usize,
}

/// Derive the status. The ad allow-list check precedes the tracking one.
pub fn blocker_status(inputs: StatusInputs) -> BlockerStatus {
    if !inputs.enabled {
        return BlockerStatus::Disabled;
    }
    if !inputs.has_url {
        return BlockerStatus::NoBlockedURLs;
    }

    if inputs.total == 0 {
        if inputs.ad_allow_listed && inputs.tracking_allow_listed {
            return BlockerStatus::AllowListed;
        }
        return BlockerStatus::NoBlockedURLs;
    }

    if inputs.ad_allow_listed {
        BlockerStatus::AdBlockAllowListed
    } else if inputs.tracking_allow_listed {
        BlockerStatus::AntiTrackingAllowListed
    } else {
        BlockerStatus::Blocking
    }
}
