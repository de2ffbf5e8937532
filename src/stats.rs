//! Cache statistics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Outcome of a completed upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    /// No previous manifest was stored, so the live cache was rebuilt from
    /// the holding area alone.
    pub first_install: bool,
    /// Live entries kept because their fingerprint did not change.
    pub retained: usize,
    /// Live entries removed because they were dropped or changed.
    pub evicted: usize,
    /// Entries moved from the holding area into the live cache.
    pub promoted: usize,
}

/// Outcome of a completed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Resources that were already cached.
    pub already_cached: usize,
    /// Resources fetched and stored.
    pub fetched: usize,
    /// Total body bytes fetched.
    pub total_bytes: u64,
}

/// Point-in-time copy of [`ResolveStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSnapshot {
    /// Requests served from the cache without touching the network.
    pub cache_hits: u64,
    /// Requests that went to the network.
    pub network_fetches: u64,
    /// Network responses written to the cache.
    pub stored: u64,
    /// Root requests served from cache after a network failure.
    pub offline_fallbacks: u64,
    /// Requests left to the host.
    pub declined: u64,
}

impl ResolveSnapshot {
    /// Returns the number of requests the manager answered.
    #[must_use]
    pub const fn handled(&self) -> u64 {
        self.cache_hits + self.network_fetches
    }
}

/// Running counters for resolve decisions.
#[derive(Debug, Default)]
pub struct ResolveStats {
    cache_hits: AtomicU64,
    network_fetches: AtomicU64,
    stored: AtomicU64,
    offline_fallbacks: AtomicU64,
    declined: AtomicU64,
}

impl ResolveStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.offline_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_declined(&self) {
        self.declined.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> ResolveSnapshot {
        ResolveSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            offline_fallbacks: self.offline_fallbacks.load(Ordering::Relaxed),
            declined: self.declined.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ResolveStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_fetch();
        stats.record_store();
        stats.record_declined();

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.network_fetches, 1);
        assert_eq!(snap.stored, 1);
        assert_eq!(snap.offline_fallbacks, 0);
        assert_eq!(snap.declined, 1);
        assert_eq!(snap.handled(), 3);
    }

    #[test]
    fn stats_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResolveStats>();
    }
}
