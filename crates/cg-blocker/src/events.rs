//! Blocker notifications

use serde::Serialize;
use tokio::sync::broadcast;

/// Identifies a tab for stats notifications.
pub type TabId = u64;

/// Capacity of the event channel. Slow subscribers observe `Lagged`.
pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockerEvent {
    /// Rule lists are compiled and the tracker database load was attempted
    SetupCompleted,
    /// Tabs should reinstall their rule lists
    SetupRequired,
    /// Page stats of a tab changed
    StatsChanged { tab: TabId },
}

/// Fire-and-forget broadcast of [`BlockerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BlockerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Send to current subscribers. Having none is not an error.
    pub fn emit(&self, event: BlockerEvent) {
        log::trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockerEvent> {
        self.sender.subscribe()
    }
}
