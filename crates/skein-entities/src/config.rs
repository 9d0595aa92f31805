//! Cache configuration.

use std::time::Duration;

use crate::store::DEFAULT_UPDATE_CAPACITY;

/// How responses that resolve out of order are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Every response is written in the order it resolves. A slow, older
    /// request can overwrite the result of a newer one.
    #[default]
    LastResponseWins,
    /// Responses from requests older than the latest one issued for the
    /// same key are discarded.
    LatestRequestWins,
}

/// Settings for an [`EntityCache`](crate::EntityCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Out-of-order response handling.
    pub staleness: StalenessPolicy,
    /// How long batched lookups wait to collect ids from other callers.
    /// Zero means a single scheduler yield.
    pub batch_window: Duration,
    /// Store update channel capacity. Slow subscribers that fall further
    /// behind than this re-read their slice instead of replaying updates.
    pub update_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness: StalenessPolicy::default(),
            batch_window: Duration::ZERO,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_staleness(mut self, staleness: StalenessPolicy) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    pub fn with_update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity;
        self
    }
}
