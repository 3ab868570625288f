//! Adaptive query-stream cache.
//!
//! ## Architecture
//! - A [`CartCore`] decides which query keys keep a live [`Multiplexer`].
//! - The core sits behind one `parking_lot::RwLock`. Hits take the read lock
//!   and set the entry's atomic reference bits; misses take the write lock.
//! - Capacity is a number of entries derived from the [`SizeBudget`]: the
//!   byte budget divided by the per-entry estimate.
//! - Backend streams are opened through a [`QuerySource`] on a miss, after
//!   the write lock is released. The new entry holds a multiplexer that is
//!   still opening, so concurrent requests for the key share it and other
//!   keys are never held up by a slow open.
//! - Multiplexers run on a shared [`Executor`]. An entry demoted to history
//!   keeps its multiplexer retired; one that falls out of history is shut
//!   down.
//!
//! ## Core Operations
//! - `request`: hand out a [`ClientHandle`] for a query, opening the backend
//!   on a miss.
//! - `remove`: forget a key. A live multiplexer is retired, a remembered one
//!   shut down.
//! - `clear`: forget everything and shut every multiplexer down.
//! - `metrics`: counters and list gauges.
//!
//! ## Staleness
//! - A non-immutable entry older than the timeout is a miss: it is reaped,
//!   its multiplexer retired, and the key re-admitted with a fresh stream.
//! - A zero timeout disables expiry.
//! - `request(key, true)` accepts any live entry regardless of age.
//!
//! ## Example Usage
//! ```rust
//! use streamcache::builder::CacheBuilder;
//! use streamcache::error::BackendError;
//! use streamcache::traits::{BackendStream, IterStream, Materializer};
//!
//! let store = CacheBuilder::new()
//!     .size("1MB")
//!     .unwrap()
//!     .build(|key: &str| -> Result<Box<dyn BackendStream<String>>, BackendError> {
//!         let rows: Vec<Result<String, BackendError>> =
//!             vec![Ok(format!("{key}#0")), Ok(format!("{key}#1"))];
//!         Ok(Box::new(IterStream::new(rows)))
//!     })
//!     .unwrap();
//!
//! let mut a = store.request("g.V()", false);
//! let mut b = store.request("g.V()", false);
//! assert_eq!(a.materialize().as_deref().map(String::as_str), Some("g.V()#0"));
//! assert_eq!(b.materialize().as_deref().map(String::as_str), Some("g.V()#0"));
//! assert_eq!(store.metrics().request_hits, 1);
//! ```
//!
//! ## Thread Safety
//! - `CacheStore` is `Send + Sync`; share it behind an `Arc`.
//! - Handles are `Send` and owned by one consumer each.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::config::SizeBudget;
use crate::error::{BackendError, BuildError};
use crate::executor::Executor;
use crate::handle::ClientHandle;
use crate::metrics::counters::StoreCounters;
use crate::metrics::{CacheMetricsSnapshot, ListLens};
use crate::multiplexer::Multiplexer;
use crate::policy::cart::{CartCore, CartEntry, ListKind};
use crate::traits::QuerySource;

/// Memory- and time-bounded cache of shared query streams.
#[must_use]
pub struct CacheStore<V> {
    source: Box<dyn QuerySource<V>>,
    budget: SizeBudget,
    clock: Arc<dyn Clock>,
    executor: Executor,
    core: RwLock<CartCore<Multiplexer<V>>>,
    counters: StoreCounters,
}

impl<V> CacheStore<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a store over `source` with the given budget, the system
    /// clock and a default executor.
    pub fn new<S>(source: S, budget: SizeBudget) -> Result<Self, BuildError>
    where
        S: QuerySource<V> + 'static,
    {
        Self::with_clock(source, budget, Arc::new(SystemClock))
    }

    pub fn with_clock<S>(
        source: S,
        budget: SizeBudget,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BuildError>
    where
        S: QuerySource<V> + 'static,
    {
        Self::with_executor(source, budget, clock, Executor::with_defaults()?)
    }

    /// Creates a store whose multiplexers run on `executor`.
    pub fn with_executor<S>(
        source: S,
        budget: SizeBudget,
        clock: Arc<dyn Clock>,
        executor: Executor,
    ) -> Result<Self, BuildError>
    where
        S: QuerySource<V> + 'static,
    {
        let capacity = budget.entry_capacity()?;
        tracing::debug!(
            size_bytes = budget.size_bytes(),
            entry_size = budget.entry_size(),
            capacity,
            dispatchers = executor.dispatchers(),
            pull_workers = executor.pull_workers(),
            "cache store created"
        );
        Ok(Self {
            source: Box::new(source),
            budget,
            clock,
            executor,
            core: RwLock::new(CartCore::new(capacity)),
            counters: StoreCounters::default(),
        })
    }

    /// Returns a reader for `key`, opening a backend stream on a miss.
    ///
    /// Never fails: a backend that cannot open the query yields a handle
    /// whose first read reports the error.
    pub fn request(&self, key: &str, immutable: bool) -> ClientHandle<V> {
        let now = self.clock.now();

        {
            let core = self.core.read();
            if let Some(handle) = self.try_hit(&core, key, immutable, now) {
                return handle;
            }
        }

        let mut core = self.core.write();
        // Another writer may have admitted the key while we waited.
        if let Some(handle) = self.try_hit(&core, key, immutable, now) {
            return handle;
        }
        if core.contains(key) {
            self.counters.inc_stale_reap();
            tracing::debug!(key, "stale entry reaped");
        }
        self.counters.inc_miss();

        let mux = Multiplexer::opening(&self.executor, key);
        let handle = mux.handle();
        let admission = core.admit(key, now, immutable, mux, Multiplexer::retire);
        self.counters
            .record_admission(admission.history_hit, admission.stats);
        drop(core);

        drop(admission.replaced);
        for dropped in admission.dropped {
            dropped.shutdown();
        }

        let stream = panic::catch_unwind(AssertUnwindSafe(|| self.source.open(key)))
            .unwrap_or_else(|_| Err(BackendError::msg("backend open panicked")));
        if stream.is_err() {
            self.counters.inc_open_failure();
        }
        handle.link().deliver(stream);
        handle
    }

    /// Forgets `key`, live or remembered.
    ///
    /// A live multiplexer is retired and handles already issued keep
    /// reading. A remembered one is shut down. Returns `false` if the key was
    /// unknown.
    pub fn remove(&self, key: &str) -> bool {
        let Some(removed) = self.core.write().remove(key) else {
            return false;
        };
        if removed.live {
            removed.payload.retire();
        } else {
            removed.payload.shutdown();
        }
        self.counters.inc_remove();
        tracing::debug!(key, live = removed.live, "entry removed");
        true
    }

    /// Forgets every key and shuts down every multiplexer, live or
    /// remembered.
    ///
    /// Values already returned stay valid; further reads on existing handles
    /// fail with [`MultiplexerClosed`](crate::error::CacheError::MultiplexerClosed).
    pub fn clear(&self) {
        let muxes = self.core.write().clear();
        tracing::debug!(multiplexers = muxes.len(), "cache cleared");
        for mux in muxes {
            mux.shutdown();
        }
    }
}

impl<V> CacheStore<V> {
    fn try_hit(
        &self,
        core: &CartCore<Multiplexer<V>>,
        key: &str,
        immutable: bool,
        now: Instant,
    ) -> Option<ClientHandle<V>> {
        let entry = core.lookup(key)?;
        if !self.is_fresh(entry, immutable, now) {
            return None;
        }
        let mux = entry.payload();
        entry.reference();
        self.counters.inc_hit();
        Some(mux.handle())
    }

    fn is_fresh(&self, entry: &CartEntry<Multiplexer<V>>, immutable: bool, now: Instant) -> bool {
        immutable
            || entry.is_immutable()
            || !self
                .budget
                .is_stale(now.saturating_duration_since(entry.birth()))
    }

    /// Returns `true` if `key` has a live entry, fresh or not.
    pub fn contains(&self, key: &str) -> bool {
        self.core.read().contains(key)
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.core.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.read().is_empty()
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.core.read().capacity()
    }

    /// The adaptive recency target `p`.
    pub fn target_recent_size(&self) -> usize {
        self.core.read().target_recent_size()
    }

    pub fn list_lens(&self) -> ListLens {
        list_lens(&self.core.read())
    }

    pub fn budget(&self) -> &SizeBudget {
        &self.budget
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let core = self.core.read();
        let counters = self.counters.values();
        CacheMetricsSnapshot {
            request_calls: counters.hits + counters.misses,
            request_hits: counters.hits,
            request_misses: counters.misses,
            stale_reaps: counters.stale_reaps,
            recent_history_hits: counters.recent_history_hits,
            frequent_history_hits: counters.frequent_history_hits,
            evicted_entries: counters.evictions,
            promotions: counters.promotions,
            history_drops: counters.history_drops,
            removes: counters.removes,
            open_failures: counters.open_failures,
            lists: list_lens(&core),
            target_recent_size: core.target_recent_size(),
            capacity: core.capacity(),
        }
    }

    /// Validates the policy invariants. Available in debug/test builds.
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.core.read().debug_validate_invariants();
    }
}

fn list_lens<P>(core: &CartCore<P>) -> ListLens {
    ListLens {
        recent: core.list_len(ListKind::Recent),
        frequent: core.list_len(ListKind::Frequent),
        recent_history: core.list_len(ListKind::RecentHistory),
        frequent_history: core.list_len(ListKind::FrequentHistory),
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("budget", &self.budget)
            .field("executor", &self.executor)
            .field("core", &*self.core.read())
            .finish_non_exhaustive()
    }
}
