//! Lookup and refresh counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Fresh entries served.
    pub hits: u64,
    /// Stale entries served while a refresh was requested.
    pub stale_hits: u64,
    /// Lookups that found nothing servable.
    pub misses: u64,
    /// Successful synchronous origin fetches.
    pub loads: u64,
    /// Synchronous origin fetches that failed or timed out.
    pub load_failures: u64,
    pub refreshes_enqueued: u64,
    /// Refresh requests rejected because the queue was full or closed.
    pub refreshes_dropped: u64,
    pub refreshes_completed: u64,
    pub refreshes_failed: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Share of lookups served from the cache, stale or fresh.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) hits: AtomicU64,
    pub(crate) stale_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    pub(crate) refreshes_enqueued: AtomicU64,
    pub(crate) refreshes_dropped: AtomicU64,
    pub(crate) refreshes_completed: AtomicU64,
    pub(crate) refreshes_failed: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.hits),
            stale_hits: load(&self.stale_hits),
            misses: load(&self.misses),
            loads: load(&self.loads),
            load_failures: load(&self.load_failures),
            refreshes_enqueued: load(&self.refreshes_enqueued),
            refreshes_dropped: load(&self.refreshes_dropped),
            refreshes_completed: load(&self.refreshes_completed),
            refreshes_failed: load(&self.refreshes_failed),
            evictions: load(&self.evictions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_counts_stale_hits() {
        let stats = CacheStats {
            hits: 2,
            stale_hits: 1,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let counters = Counters::default();
        Counters::bump(&counters.hits);
        Counters::bump(&counters.evictions);
        let json = serde_json::to_value(counters.snapshot()).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["evictions"], 1);
        assert_eq!(json["misses"], 0);
    }
}
