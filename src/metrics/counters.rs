use std::sync::atomic::{AtomicU64, Ordering};

use crate::policy::cart::{AdmissionStats, ListKind};

/// Lock-free event counters for a [`CacheStore`](crate::store::CacheStore).
///
/// Hits are counted under the store's read lock, so every counter is atomic.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_reaps: AtomicU64,
    recent_history_hits: AtomicU64,
    frequent_history_hits: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    history_drops: AtomicU64,
    removes: AtomicU64,
    open_failures: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CounterValues {
    pub hits: u64,
    pub misses: u64,
    pub stale_reaps: u64,
    pub recent_history_hits: u64,
    pub frequent_history_hits: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub history_drops: u64,
    pub removes: u64,
    pub open_failures: u64,
}

impl StoreCounters {
    pub fn values(&self) -> CounterValues {
        CounterValues {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_reaps: self.stale_reaps.load(Ordering::Relaxed),
            recent_history_hits: self.recent_history_hits.load(Ordering::Relaxed),
            frequent_history_hits: self.frequent_history_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            history_drops: self.history_drops.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
        }
    }

    pub fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_reap(&self) {
        self.stale_reaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the outcome of one CART admission into the totals.
    pub fn record_admission(&self, history_hit: Option<ListKind>, stats: AdmissionStats) {
        match history_hit {
            Some(ListKind::RecentHistory) => {
                self.recent_history_hits.fetch_add(1, Ordering::Relaxed);
            },
            Some(ListKind::FrequentHistory) => {
                self.frequent_history_hits.fetch_add(1, Ordering::Relaxed);
            },
            _ => {},
        }
        self.evictions.fetch_add(stats.evictions, Ordering::Relaxed);
        self.promotions.fetch_add(stats.promotions, Ordering::Relaxed);
        self.history_drops
            .fetch_add(stats.history_dropped, Ordering::Relaxed);
    }
}
