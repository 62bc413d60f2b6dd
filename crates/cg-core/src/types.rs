//! Core type definitions for ContentGuard
//!
//! Tracker categories, rule list identities, allow-list kinds and the
//! display-oriented blocker status shared by every other module.

use serde::{Deserialize, Serialize};

// =============================================================================
// Tracker Categories
// =============================================================================

/// Tracker category as stored in the tracker database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WtmCategory {
    #[serde(rename = "advertising")]
    Advertising,
    #[serde(rename = "site_analytics")]
    Analytics,
    #[serde(rename = "content")]
    Content,
    #[serde(rename = "social_media")]
    Social,
    #[serde(rename = "essential")]
    Essential,
    #[serde(rename = "misc")]
    Misc,
    #[serde(rename = "hosting")]
    Hosting,
    #[serde(rename = "pornvertising")]
    Pornvertising,
    #[serde(rename = "audio_video_player")]
    AudioVideoPlayer,
    #[serde(rename = "extensions")]
    Extensions,
    #[serde(rename = "customer_interaction")]
    CustomerInteraction,
    #[serde(rename = "comments")]
    Comments,
    #[serde(rename = "cdn")]
    Cdn,
    #[serde(rename = "unknown")]
    Unknown,
}

impl WtmCategory {
    /// Number of categories.
    pub const COUNT: usize = 14;

    /// Every category, in counter order.
    pub const ALL: [WtmCategory; Self::COUNT] = [
        Self::Advertising,
        Self::Analytics,
        Self::Content,
        Self::Social,
        Self::Essential,
        Self::Misc,
        Self::Hosting,
        Self::Pornvertising,
        Self::AudioVideoPlayer,
        Self::Extensions,
        Self::CustomerInteraction,
        Self::Comments,
        Self::Cdn,
        Self::Unknown,
    ];

    /// Raw value used by the tracker database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advertising => "advertising",
            Self::Analytics => "site_analytics",
            Self::Content => "content",
            Self::Social => "social_media",
            Self::Essential => "essential",
            Self::Misc => "misc",
            Self::Hosting => "hosting",
            Self::Pornvertising => "pornvertising",
            Self::AudioVideoPlayer => "audio_video_player",
            Self::Extensions => "extensions",
            Self::CustomerInteraction => "customer_interaction",
            Self::Comments => "comments",
            Self::Cdn => "cdn",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a raw database value. Unrecognized values yield `None`.
    pub fn from_raw(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == raw)
    }

    /// Display-layer parse: unrecognized values fall back to `Unknown`.
    ///
    /// The table loader never uses this; it skips unknown categories instead.
    pub fn from_raw_or_unknown(raw: &str) -> Self {
        Self::from_raw(raw).unwrap_or(Self::Unknown)
    }

    /// Position of this category in counter arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for WtmCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// A known third-party tracker: category plus app identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tracker {
    pub category: WtmCategory,
    pub id: String,
}

impl Tracker {
    pub fn new(category: WtmCategory, id: impl Into<String>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }
}

// =============================================================================
// Blocklists
// =============================================================================

/// Logical rule list identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlocklistName {
    AdvertisingNetwork,
    AdvertisingCosmetic,
    TrackingNetwork,
    PopupsCosmetic,
    PopupsNetwork,
}

impl BlocklistName {
    pub const ALL: [BlocklistName; 5] = [
        Self::AdvertisingNetwork,
        Self::AdvertisingCosmetic,
        Self::TrackingNetwork,
        Self::PopupsCosmetic,
        Self::PopupsNetwork,
    ];

    /// Bundled resource name, also used as the compiled store identifier.
    pub fn filename(self) -> &'static str {
        match self {
            Self::AdvertisingNetwork => "safari-ads-network",
            Self::AdvertisingCosmetic => "safari-ads-cosmetic",
            Self::TrackingNetwork => "safari-tracking-network",
            Self::PopupsCosmetic => "safari-popups-cosmetic",
            Self::PopupsNetwork => "safari-popups-network",
        }
    }

    /// Reverse of [`filename`](Self::filename).
    pub fn from_filename(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|list| list.filename() == name)
    }

    /// Allow-list whose domains are exempted from this list.
    pub fn allow_list_kind(self) -> AllowListKind {
        match self {
            Self::AdvertisingNetwork | Self::AdvertisingCosmetic => AllowListKind::Ads,
            Self::TrackingNetwork => AllowListKind::Tracking,
            Self::PopupsCosmetic | Self::PopupsNetwork => AllowListKind::Popups,
        }
    }

    /// Cosmetic lists carry an extra static rule.
    pub fn is_cosmetic(self) -> bool {
        matches!(self, Self::AdvertisingCosmetic | Self::PopupsCosmetic)
    }
}

impl std::fmt::Display for BlocklistName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.filename())
    }
}

// =============================================================================
// Allow-list Kinds
// =============================================================================

/// The three independent allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowListKind {
    Ads,
    Tracking,
    Popups,
}

impl AllowListKind {
    pub const ALL: [AllowListKind; 3] = [Self::Ads, Self::Tracking, Self::Popups];

    /// Persisted file name in the documents directory.
    pub fn filename(self) -> &'static str {
        match self {
            Self::Ads => "ads_whitelist",
            Self::Tracking => "whitelist",
            Self::Popups => "popups_whitelist",
        }
    }

    /// Rule lists that must be recompiled when this allow-list changes.
    pub fn dependent_lists(self) -> &'static [BlocklistName] {
        match self {
            Self::Ads => &[BlocklistName::AdvertisingNetwork, BlocklistName::AdvertisingCosmetic],
            Self::Tracking => &[BlocklistName::TrackingNetwork],
            Self::Popups => &[BlocklistName::PopupsCosmetic, BlocklistName::PopupsNetwork],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ads => "ads",
            Self::Tracking => "tracking",
            Self::Popups => "popups",
        }
    }
}

impl std::str::FromStr for AllowListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ads" => Ok(Self::Ads),
            "tracking" => Ok(Self::Tracking),
            "popups" => Ok(Self::Popups),
            other => Err(format!("unknown allow-list kind '{}'", other)),
        }
    }
}

// =============================================================================
// Blocker Status
// =============================================================================

/// Display summary of the blocking state of a page. Always derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockerStatus {
    Disabled,
    /// Blocking is enabled but nothing has been blocked yet
    NoBlockedURLs,
    AdBlockAllowListed,
    AntiTrackingAllowListed,
    AllowListed,
    Blocking,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_raw_values() {
        assert_eq!(WtmCategory::from_raw("site_analytics"), Some(WtmCategory::Analytics));
        assert_eq!(WtmCategory::from_raw("social_media"), Some(WtmCategory::Social));
        assert_eq!(WtmCategory::from_raw("analytics"), None);
        assert_eq!(WtmCategory::from_raw_or_unknown("analytics"), WtmCategory::Unknown);
        for category in WtmCategory::ALL {
            assert_eq!(WtmCategory::from_raw(category.as_str()), Some(category));
            assert_eq!(WtmCategory::ALL[category.index()], category);
        }
    }

    #[test]
    fn test_category_serde_uses_raw_values() {
        let json = serde_json::to_string(&WtmCategory::AudioVideoPlayer).unwrap();
        assert_eq!(json, "\"audio_video_player\"");
    }

    #[test]
    fn test_blocklist_filenames() {
        assert_eq!(BlocklistName::ALL.len(), 5);
        for list in BlocklistName::ALL {
            assert_eq!(BlocklistName::from_filename(list.filename()), Some(list));
        }
        assert_eq!(BlocklistName::from_filename("safari-old-list"), None);
    }

    #[test]
    fn test_allow_list_dependencies() {
        for kind in AllowListKind::ALL {
            for list in kind.dependent_lists() {
                assert_eq!(list.allow_list_kind(), kind);
            }
        }
        assert_eq!("Tracking".parse::<AllowListKind>(), Ok(AllowListKind::Tracking));
        assert!("cookies".parse::<AllowListKind>().is_err());
    }
}
