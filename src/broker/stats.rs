//! Gateway counters
//!
//! Four counters behind their own lock, independent of the registries, so a
//! stats read never waits on a broadcast.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub subscriber_count: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct Stats {
    inner: RwLock<StatsSnapshot>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut StatsSnapshot)) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn message_sent(&self) {
        self.update(|s| s.messages_sent += 1);
    }

    pub fn message_received(&self) {
        self.update(|s| s.messages_received += 1);
    }

    pub fn error(&self) {
        self.update(|s| s.errors += 1);
    }

    pub fn subscriber_added(&self) {
        self.update(|s| s.subscriber_count += 1);
    }

    /// Never goes below zero.
    pub fn subscriber_removed(&self) {
        self.update(|s| s.subscriber_count = s.subscriber_count.saturating_sub(1));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        self.update(|s| *s = StatsSnapshot::default());
    }
}
