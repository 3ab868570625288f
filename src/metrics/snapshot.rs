/// Lengths of the four CART orderings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListLens {
    pub recent: usize,
    pub frequent: usize,
    pub recent_history: usize,
    pub frequent_history: usize,
}

impl ListLens {
    /// Live entries (recent + frequent).
    pub fn live(&self) -> usize {
        self.recent + self.frequent
    }

    /// Remembered entries kept for adaptation.
    pub fn history(&self) -> usize {
        self.recent_history + self.frequent_history
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheMetricsSnapshot {
    pub request_calls: u64,
    pub request_hits: u64,
    pub request_misses: u64,
    pub stale_reaps: u64, // stable hits past the timeout, handled as misses

    pub recent_history_hits: u64,
    pub frequent_history_hits: u64,

    pub evicted_entries: u64,
    pub promotions: u64,
    pub history_drops: u64,
    pub removes: u64,
    pub open_failures: u64,

    // gauges captured at snapshot time
    pub lists: ListLens,
    pub target_recent_size: usize,
    pub capacity: usize,
}

impl CacheMetricsSnapshot {
    /// Fraction of requests served by a live entry, or 0 with no requests.
    pub fn hit_ratio(&self) -> f64 {
        if self.request_calls == 0 {
            0.0
        } else {
            self.request_hits as f64 / self.request_calls as f64
        }
    }
}
