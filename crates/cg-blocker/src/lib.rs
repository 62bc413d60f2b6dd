//! ContentGuard Blocker Service
//!
//! Ties the tracker database, the allow-lists and the rule list compiler
//! together behind [`ContentBlocker`], and drives per-tab blocking through
//! [`TabContentBlocker`].

pub mod blocker;
pub mod config;
pub mod events;
pub mod tab;

pub use blocker::ContentBlocker;
pub use config::{BlockerConfig, ConfigError};
pub use events::{BlockerEvent, EventBus, TabId};
pub use tab::{ContentBlockerTab, TabContentBlocker, TabSettings};
