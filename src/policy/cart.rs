//! CLOCK with Adaptive Replacement and Temporal filtering (CART) core.
//!
//! Decides which query keys hold live payloads and which are remembered in
//! history for adaptation. The payload type is opaque here; the store uses
//! it for multiplexers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           CartCore<P> Layout                                │
//! │                                                                             │
//! │   lists: ListSet<CartEntry<P>, 4>   (one arena, four orderings)             │
//! │                                                                             │
//! │     Recent           head ─► [new] ... [old] ◄─ tail   (seen once)         │
//! │     Frequent         head ─► [hot] ... [cold] ◄─ tail  (long-term useful)  │
//! │     RecentHistory    evicted from Recent, payload retired                   │
//! │     FrequentHistory  evicted from Frequent, payload retired                 │
//! │                                                                             │
//! │   stable:   FxHashMap<key, SlotId>   == Recent ∪ Frequent                   │
//! │   unstable: FxHashMap<key, SlotId>   == RecentHistory ∪ FrequentHistory     │
//! │   target (p): adaptive split between Recent and Frequent, 0 ≤ p ≤ capacity  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reference bits
//!
//! A hit sets `referenced`; a second hit before the entry's next list
//! transition also sets `long_term`. Bits are atomics so hits only need shared
//! access to the core.
//!
//! ## Replacement
//!
//! - `|Recent| ≥ max(1, p)`: examine the tail of Recent
//!   - `long_term` → promote to head of Frequent, clear bits
//!   - `referenced` → clear it, move to head of Recent (second chance)
//!   - otherwise → evict to head of RecentHistory
//! - else examine the tail of Frequent
//!   - any bit set → clear bits, move to head of Frequent
//!   - otherwise → evict to head of FrequentHistory
//!
//! ## Adaptation
//!
//! - hit in RecentHistory: `p += max(1, |FH| / |RH|)`, capped at capacity
//! - hit in FrequentHistory: `p -= max(1, |RH| / |FH|)`, floored at 0
//!
//! History hits are re-admitted at the head of Recent with `long_term` set,
//! so the next sweep promotes them to Frequent.
//!
//! ## Payload lifetime
//!
//! An evicted entry keeps its payload in history. The caller sees it once
//! when it is demoted (`on_demote`) and gets it back when the entry falls out
//! of history ([`Admission::dropped`]).
//!
//! ## References
//!
//! - Bansal & Modha, "CAR: Clock with Adaptive Replacement", FAST 2004

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::ds::{ListSet, SlotId};

/// Which ordering an entry belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ListKind {
    Recent,
    Frequent,
    RecentHistory,
    FrequentHistory,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Recent,
        ListKind::Frequent,
        ListKind::RecentHistory,
        ListKind::FrequentHistory,
    ];

    #[inline]
    const fn idx(self) -> usize {
        match self {
            ListKind::Recent => 0,
            ListKind::Frequent => 1,
            ListKind::RecentHistory => 2,
            ListKind::FrequentHistory => 3,
        }
    }

    #[inline]
    const fn from_idx(idx: usize) -> ListKind {
        match idx {
            0 => ListKind::Recent,
            1 => ListKind::Frequent,
            2 => ListKind::RecentHistory,
            _ => ListKind::FrequentHistory,
        }
    }

    /// `true` for the two lists that hold live payloads.
    #[inline]
    pub const fn is_stable(self) -> bool {
        matches!(self, ListKind::Recent | ListKind::Frequent)
    }
}

/// One cached query, live or remembered.
#[derive(Debug)]
pub struct CartEntry<P> {
    key: Arc<str>,
    birth: Instant,
    immutable: bool,
    referenced: AtomicBool,
    long_term: AtomicBool,
    payload: P,
}

impl<P> CartEntry<P> {
    fn new(key: Arc<str>, birth: Instant, immutable: bool, payload: P) -> Self {
        Self {
            key,
            birth,
            immutable,
            referenced: AtomicBool::new(false),
            long_term: AtomicBool::new(false),
            payload,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn birth(&self) -> Instant {
        self.birth
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// The entry's payload. History entries keep the retired payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::Relaxed)
    }

    pub fn is_long_term(&self) -> bool {
        self.long_term.load(Ordering::Relaxed)
    }

    /// Applies the CART hit rule: the first hit since the last list
    /// transition sets `referenced`, a repeat hit sets `long_term`.
    pub fn reference(&self) {
        if self.referenced.swap(true, Ordering::Relaxed) {
            self.long_term.store(true, Ordering::Relaxed);
        }
    }

    fn clear_bits(&self) {
        self.referenced.store(false, Ordering::Relaxed);
        self.long_term.store(false, Ordering::Relaxed);
    }
}

/// Result of admitting a key.
///
/// Payloads whose entries moved to history stay on the history entry and
/// are reported through the `on_demote` callback of [`CartCore::admit`].
#[derive(Debug)]
pub struct Admission<P> {
    /// Payload of the entry this admission superseded: a stale live entry or
    /// the history entry that was hit.
    pub replaced: Option<P>,
    /// Payloads whose entries fell out of history.
    pub dropped: Vec<P>,
    /// The history list the key was found in, if any.
    pub history_hit: Option<ListKind>,
    pub stats: AdmissionStats,
}

/// Counters for what a single admission did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    pub evictions: u64,
    pub promotions: u64,
    pub history_dropped: u64,
}

/// Core CART bookkeeping over four orderings in one arena.
///
/// Not thread-safe for mutation; the store guards it with an `RwLock` and
/// only takes the write side on misses.
#[must_use]
pub struct CartCore<P> {
    lists: ListSet<CartEntry<P>, 4>,
    stable: FxHashMap<Arc<str>, SlotId>,
    unstable: FxHashMap<Arc<str>, SlotId>,
    target: usize,
    capacity: usize,
}

/// What one replacement pass touched.
struct Sweep<P> {
    demoted: Vec<SlotId>,
    dropped: Vec<P>,
    stats: AdmissionStats,
}

impl<P> Sweep<P> {
    fn new() -> Self {
        Self {
            demoted: Vec::new(),
            dropped: Vec::new(),
            stats: AdmissionStats::default(),
        }
    }
}

/// Result of [`CartCore::remove`].
#[derive(Debug, PartialEq, Eq)]
pub struct Removed<P> {
    /// `true` if the key was live, `false` if it was only in history.
    pub live: bool,
    pub payload: P,
}

impl<P> CartCore<P> {
    /// Creates a core admitting up to `capacity` live entries.
    ///
    /// History is bounded so that live plus remembered keys never exceed
    /// `2 * capacity`. The target `p` starts at 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            lists: ListSet::with_capacity(capacity.saturating_mul(2).min(1 << 16)),
            stable: FxHashMap::default(),
            unstable: FxHashMap::default(),
            target: 0,
            capacity,
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns the live entry for `key`, without touching reference bits.
    pub fn lookup(&self, key: &str) -> Option<&CartEntry<P>> {
        let &id = self.stable.get(key)?;
        self.lists.get(id)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.stable.contains_key(key)
    }

    /// Returns which history list remembers `key`, if any.
    pub fn history_of(&self, key: &str) -> Option<ListKind> {
        let &id = self.unstable.get(key)?;
        self.lists.list_of(id).map(ListKind::from_idx)
    }

    /// Returns which list `key` is in, live or history.
    pub fn list_of(&self, key: &str) -> Option<ListKind> {
        let id = self.stable.get(key).or_else(|| self.unstable.get(key))?;
        self.lists.list_of(*id).map(ListKind::from_idx)
    }

    // =========================================================================
    // Admission and replacement
    // =========================================================================

    /// Admits `key` with a fresh payload at the head of Recent.
    ///
    /// A live entry under the same key (a stale hit) is discarded first and
    /// its payload handed back in [`Admission::replaced`]. History hits adapt
    /// `p` before replacement. `on_demote` sees the payload of every entry
    /// this admission moved to history and left there.
    pub fn admit(
        &mut self,
        key: &str,
        birth: Instant,
        immutable: bool,
        payload: P,
        mut on_demote: impl FnMut(&P),
    ) -> Admission<P> {
        let mut sweep = Sweep::new();

        if self.capacity == 0 {
            sweep.dropped.push(payload);
            return Admission {
                replaced: None,
                dropped: sweep.dropped,
                history_hit: None,
                stats: sweep.stats,
            };
        }

        let mut replaced = None;
        if let Some(id) = self.stable.remove(key)
            && let Some(stale) = self.lists.remove(id)
        {
            tracing::debug!(key, "discarding stale entry");
            replaced = Some(stale.payload);
        }

        let history_hit = self.history_of(key);
        match history_hit {
            Some(ListKind::RecentHistory) => {
                let rh = self.lists.len(ListKind::RecentHistory.idx());
                let fh = self.lists.len(ListKind::FrequentHistory.idx());
                let delta = (fh / rh.max(1)).max(1);
                self.target = (self.target + delta).min(self.capacity);
                tracing::debug!(key, p = self.target, "recent-history hit, favoring recency");
            },
            Some(ListKind::FrequentHistory) => {
                let rh = self.lists.len(ListKind::RecentHistory.idx());
                let fh = self.lists.len(ListKind::FrequentHistory.idx());
                let delta = (rh / fh.max(1)).max(1);
                self.target = self.target.saturating_sub(delta);
                tracing::debug!(key, p = self.target, "frequent-history hit, favoring frequency");
            },
            _ => {},
        }
        if history_hit.is_some()
            && let Some(id) = self.unstable.remove(key)
            && let Some(remembered) = self.lists.remove(id)
        {
            replaced = Some(remembered.payload);
        }

        if self.len() >= self.capacity {
            self.replace(&mut sweep);
            if history_hit.is_none() {
                self.trim_history(&mut sweep);
            }
        }

        let key: Arc<str> = Arc::from(key);
        let entry = CartEntry::new(Arc::clone(&key), birth, immutable, payload);
        if history_hit.is_some() {
            entry.long_term.store(true, Ordering::Relaxed);
        }
        let id = self.lists.push_front(ListKind::Recent.idx(), entry);
        self.stable.insert(key, id);

        for &id in &sweep.demoted {
            if let Some(demoted) = self.lists.get(id).map(CartEntry::payload) {
                on_demote(demoted);
            }
        }
        Admission {
            replaced,
            dropped: sweep.dropped,
            history_hit,
            stats: sweep.stats,
        }
    }

    /// Frees one live slot, demoting the victim to history.
    fn replace(&mut self, sweep: &mut Sweep<P>) {
        // Each non-evicting step clears at least one bit or promotes an entry,
        // so three full sweeps always find a victim.
        let budget = 3 * self.len() + 3;
        for _ in 0..budget {
            let recent_len = self.lists.len(ListKind::Recent.idx());
            let frequent_len = self.lists.len(ListKind::Frequent.idx());
            let from_recent =
                recent_len > 0 && (recent_len >= self.target.max(1) || frequent_len == 0);

            if from_recent {
                let Some(id) = self.lists.back_id(ListKind::Recent.idx()) else {
                    break;
                };
                let Some(entry) = self.lists.get(id) else {
                    break;
                };
                if entry.is_long_term() {
                    entry.clear_bits();
                    self.lists.move_to_front(id, ListKind::Frequent.idx());
                    sweep.stats.promotions += 1;
                    tracing::debug!(key = entry_key(&self.lists, id), "promoted to frequent");
                } else if entry.is_referenced() {
                    entry.clear_bits();
                    self.lists.move_to_front(id, ListKind::Recent.idx());
                } else {
                    self.evict(id, ListKind::RecentHistory, sweep);
                    return;
                }
            } else {
                let Some(id) = self.lists.back_id(ListKind::Frequent.idx()) else {
                    break;
                };
                let Some(entry) = self.lists.get(id) else {
                    break;
                };
                if entry.is_referenced() || entry.is_long_term() {
                    entry.clear_bits();
                    self.lists.move_to_front(id, ListKind::Frequent.idx());
                } else {
                    self.evict(id, ListKind::FrequentHistory, sweep);
                    return;
                }
            }
        }

        // Unreachable with consistent bits; evict the coldest entry outright.
        let fallback = self
            .lists
            .back_id(ListKind::Recent.idx())
            .map(|id| (id, ListKind::RecentHistory))
            .or_else(|| {
                self.lists
                    .back_id(ListKind::Frequent.idx())
                    .map(|id| (id, ListKind::FrequentHistory))
            });
        if let Some((id, history)) = fallback {
            self.evict(id, history, sweep);
        }
    }

    /// Moves a live entry, payload and all, to the head of `history`.
    fn evict(&mut self, id: SlotId, history: ListKind, sweep: &mut Sweep<P>) {
        let Some(entry) = self.lists.get(id) else {
            return;
        };
        entry.clear_bits();
        let key = Arc::clone(&entry.key);
        self.lists.move_to_front(id, history.idx());
        self.stable.remove(&key);
        tracing::debug!(key = &*key, list = ?history, "evicted to history");
        self.unstable.insert(key, id);
        sweep.demoted.push(id);
        sweep.stats.evictions += 1;
    }

    /// Bounds history after a complete miss.
    ///
    /// Keeps `|Recent| + |RecentHistory| < capacity` and the directory total
    /// below `2 * capacity` once the new entry is linked.
    fn trim_history(&mut self, sweep: &mut Sweep<P>) {
        let recent = self.lists.len(ListKind::Recent.idx());
        let rh = self.lists.len(ListKind::RecentHistory.idx());
        if recent + rh >= self.capacity && rh > 0 {
            self.drop_history_tail(ListKind::RecentHistory, sweep);
        } else if self.lists.total_len() >= 2 * self.capacity {
            if self.lists.len(ListKind::FrequentHistory.idx()) > 0 {
                self.drop_history_tail(ListKind::FrequentHistory, sweep);
            } else {
                self.drop_history_tail(ListKind::RecentHistory, sweep);
            }
        }
    }

    fn drop_history_tail(&mut self, history: ListKind, sweep: &mut Sweep<P>) {
        let Some(id) = self.lists.back_id(history.idx()) else {
            return;
        };
        let Some(entry) = self.lists.remove(id) else {
            return;
        };
        self.unstable.remove(&entry.key);
        // The slot may be reused by the entry being admitted.
        sweep.demoted.retain(|&demoted| demoted != id);
        sweep.dropped.push(entry.payload);
        sweep.stats.history_dropped += 1;
        tracing::debug!(key = &*entry.key, list = ?history, "dropped from history");
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Forgets `key` entirely, live or remembered. Returns `None` if the key
    /// was unknown.
    pub fn remove(&mut self, key: &str) -> Option<Removed<P>> {
        let (id, live) = match self.stable.remove(key) {
            Some(id) => (id, true),
            None => (self.unstable.remove(key)?, false),
        };
        self.lists.remove(id).map(|entry| Removed {
            live,
            payload: entry.payload,
        })
    }

    /// Drops every entry and resets `p`, returning every payload, live or
    /// retired.
    pub fn clear(&mut self) -> Vec<P> {
        self.stable.clear();
        self.unstable.clear();
        self.target = 0;
        self.lists.drain().map(|entry| entry.payload).collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Live entries (Recent + Frequent).
    pub fn len(&self) -> usize {
        self.stable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stable.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current adaptive target for the Recent list.
    ///
    /// Higher values favor recency, lower values favor frequency.
    pub fn target_recent_size(&self) -> usize {
        self.target
    }

    pub fn list_len(&self, list: ListKind) -> usize {
        self.lists.len(list.idx())
    }

    /// Keys of `list`, head to tail.
    pub fn keys(&self, list: ListKind) -> Vec<&str> {
        self.lists
            .iter(list.idx())
            .map(|(_, entry)| entry.key())
            .collect()
    }

    /// Validates internal invariants. Available in debug/test builds.
    ///
    /// Panics if any invariant is violated.
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.lists.debug_validate_invariants();

        let recent = self.list_len(ListKind::Recent);
        let frequent = self.list_len(ListKind::Frequent);
        let rh = self.list_len(ListKind::RecentHistory);
        let fh = self.list_len(ListKind::FrequentHistory);

        assert_eq!(recent + frequent, self.stable.len(), "stable table out of sync");
        assert_eq!(rh + fh, self.unstable.len(), "unstable table out of sync");
        assert!(
            recent + frequent <= self.capacity,
            "live({}) > capacity({})",
            recent + frequent,
            self.capacity
        );
        assert!(
            recent + frequent + rh + fh <= 2 * self.capacity,
            "directory({}) > 2 * capacity({})",
            recent + frequent + rh + fh,
            self.capacity
        );
        assert!(self.target <= self.capacity, "p({}) > capacity", self.target);

        for (key, &id) in &self.stable {
            assert!(!self.unstable.contains_key(key), "{} in both tables", key);
            let list = self.lists.list_of(id).map(ListKind::from_idx);
            assert!(list.is_some_and(ListKind::is_stable), "{} not live", key);
            let entry = self.lists.get(id).expect("stable id points to empty slot");
            assert_eq!(&*entry.key, &**key);
        }
        for (key, &id) in &self.unstable {
            let list = self.lists.list_of(id).map(ListKind::from_idx);
            assert!(list.is_some_and(|l| !l.is_stable()), "{} not history", key);
            let entry = self.lists.get(id).expect("unstable id points to empty slot");
            assert_eq!(&*entry.key, &**key);
        }
    }
}

fn entry_key<P>(lists: &ListSet<CartEntry<P>, 4>, id: SlotId) -> &str {
    lists.get(id).map(CartEntry::key).unwrap_or_default()
}

impl<P> std::fmt::Debug for CartCore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartCore")
            .field("capacity", &self.capacity)
            .field("target", &self.target)
            .field("recent", &self.list_len(ListKind::Recent))
            .field("frequent", &self.list_len(ListKind::Frequent))
            .field("recent_history", &self.list_len(ListKind::RecentHistory))
            .field("frequent_history", &self.list_len(ListKind::FrequentHistory))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Looks `key` up and references it on a hit, admits it on a miss.
    fn request(core: &mut CartCore<u32>, key: &str, payload: u32) -> bool {
        if let Some(entry) = core.lookup(key) {
            entry.reference();
            return true;
        }
        core.admit(key, Instant::now(), false, payload, |_| {});
        false
    }

    /// Admits `key` and collects the payloads it demoted.
    fn admit(core: &mut CartCore<u32>, key: &str, payload: u32) -> (Admission<u32>, Vec<u32>) {
        let mut demoted = Vec::new();
        let adm = core.admit(key, Instant::now(), false, payload, |&p| demoted.push(p));
        (adm, demoted)
    }

    #[test]
    fn cart_new_core() {
        let core: CartCore<u32> = CartCore::new(8);
        assert_eq!(core.capacity(), 8);
        assert!(core.is_empty());
        assert_eq!(core.target_recent_size(), 0);
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_zero_capacity_drops_immediately() {
        let mut core: CartCore<u32> = CartCore::new(0);
        let (adm, demoted) = admit(&mut core, "q", 7);
        assert_eq!(adm.dropped, vec![7]);
        assert!(demoted.is_empty());
        assert!(!core.contains("q"));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_admit_inserts_at_head_of_recent() {
        let mut core = CartCore::new(4);
        request(&mut core, "a", 1);
        request(&mut core, "b", 2);
        assert_eq!(core.keys(ListKind::Recent), vec!["b", "a"]);
        assert_eq!(core.lookup("a").map(CartEntry::payload), Some(&1));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_reference_rule_sets_long_term_on_second_hit() {
        let mut core = CartCore::new(4);
        request(&mut core, "a", 1);
        let entry = core.lookup("a").unwrap();
        assert!(!entry.is_referenced());
        entry.reference();
        assert!(entry.is_referenced());
        assert!(!entry.is_long_term());
        entry.reference();
        assert!(entry.is_long_term());
    }

    #[test]
    fn cart_unreferenced_tail_is_evicted_then_trimmed() {
        let mut core = CartCore::new(2);
        request(&mut core, "a", 1);
        request(&mut core, "b", 2);

        // `a` is demoted, then trimmed because |Recent| + |RecentHistory|
        // reached capacity. The new entry may reuse its slot.
        let (adm, demoted) = admit(&mut core, "c", 3);
        assert!(demoted.is_empty());
        assert_eq!(adm.dropped, vec![1]);
        assert_eq!(
            adm.stats,
            AdmissionStats {
                evictions: 1,
                promotions: 0,
                history_dropped: 1,
            }
        );
        assert!(!core.contains("a"));
        assert_eq!(core.history_of("a"), None);
        assert_eq!(core.keys(ListKind::Recent), vec!["c", "b"]);
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_long_term_tail_is_promoted_not_evicted() {
        let mut core = CartCore::new(3);
        request(&mut core, "a", 1);
        request(&mut core, "b", 2);
        request(&mut core, "c", 3);
        assert!(request(&mut core, "a", 0));
        assert!(request(&mut core, "a", 0));

        let (adm, demoted) = admit(&mut core, "d", 4);
        assert_eq!(demoted, vec![2], "b is the first unreferenced tail");
        assert!(adm.dropped.is_empty());
        assert_eq!(adm.stats.promotions, 1);
        assert_eq!(core.list_of("a"), Some(ListKind::Frequent));
        assert!(!core.lookup("a").unwrap().is_long_term());
        assert_eq!(core.history_of("b"), Some(ListKind::RecentHistory));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_single_reference_gets_second_chance_in_recent() {
        let mut core = CartCore::new(2);
        request(&mut core, "a", 1);
        request(&mut core, "b", 2);
        assert!(request(&mut core, "a", 0));

        let (adm, _) = admit(&mut core, "c", 3);
        assert_eq!(adm.dropped, vec![2]);
        assert_eq!(core.list_of("a"), Some(ListKind::Recent));
        assert!(!core.lookup("a").unwrap().is_referenced());
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_stale_readmission_replaces_old_payload() {
        let mut core = CartCore::new(4);
        request(&mut core, "a", 1);
        let (adm, demoted) = admit(&mut core, "a", 2);
        assert_eq!(adm.replaced, Some(1));
        assert!(demoted.is_empty());
        assert!(adm.history_hit.is_none());
        assert_eq!(core.len(), 1);
        assert_eq!(core.lookup("a").map(CartEntry::payload), Some(&2));
        core.debug_validate_invariants();
    }

    /// Leaves `a` in Frequent, `b` in RecentHistory and `c` in Recent.
    fn split_across_lists(core: &mut CartCore<u32>) {
        request(core, "a", 1);
        request(core, "a", 0);
        request(core, "a", 0);
        request(core, "b", 2);
        request(core, "c", 3);
        assert_eq!(core.list_of("a"), Some(ListKind::Frequent));
        assert_eq!(core.list_of("b"), Some(ListKind::RecentHistory));
        assert_eq!(core.list_of("c"), Some(ListKind::Recent));
    }

    #[test]
    fn cart_recent_history_hit_raises_target() {
        let mut core = CartCore::new(2);
        split_across_lists(&mut core);

        let (adm, demoted) = admit(&mut core, "b", 4);
        assert_eq!(adm.history_hit, Some(ListKind::RecentHistory));
        assert_eq!(adm.replaced, Some(2), "b's retired payload leaves history");
        assert_eq!(demoted, vec![3]);
        assert_eq!(core.target_recent_size(), 1);
        assert!(core.lookup("b").unwrap().is_long_term());
        assert_eq!(core.history_of("c"), Some(ListKind::RecentHistory));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_remove_live_and_history() {
        let mut core = CartCore::new(2);
        split_across_lists(&mut core);

        assert_eq!(
            core.remove("b"),
            Some(Removed {
                live: false,
                payload: 2,
            })
        );
        assert_eq!(
            core.remove("a"),
            Some(Removed {
                live: true,
                payload: 1,
            })
        );
        assert_eq!(core.remove("zzz"), None);
        assert_eq!(core.len(), 1);
        assert!(core.contains("c"));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_history_keeps_payload_until_trimmed() {
        let mut core = CartCore::new(2);
        split_across_lists(&mut core);

        // A complete miss demotes `c`; RecentHistory then reaches capacity
        // and its tail `b` falls out with its payload.
        let (adm, demoted) = admit(&mut core, "d", 4);
        assert_eq!(demoted, vec![3]);
        assert_eq!(adm.dropped, vec![2]);
        assert_eq!(adm.stats.history_dropped, 1);
        assert_eq!(core.history_of("b"), None);
        assert_eq!(core.history_of("c"), Some(ListKind::RecentHistory));
        core.debug_validate_invariants();
    }

    #[test]
    fn cart_clear_returns_every_payload() {
        let mut core = CartCore::new(2);
        split_across_lists(&mut core);
        let mut payloads = core.clear();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![1, 2, 3]);
        assert!(core.is_empty());
        assert_eq!(core.list_len(ListKind::RecentHistory), 0);
        core.debug_validate_invariants();
    }

    /// Two hot keys, then a rotation of four cold keys that come back while
    /// still remembered in RecentHistory.
    fn recency_workload(core: &mut CartCore<u32>, mut observe: impl FnMut(&CartCore<u32>)) {
        for key in ["h1", "h2"] {
            for _ in 0..3 {
                request(core, key, 0);
                observe(core);
            }
        }
        for round in 0..6 {
            for key in ["s0", "s1", "s2", "s3"] {
                request(core, key, round);
                observe(core);
            }
        }
    }

    #[test]
    fn cart_recency_workload_drifts_target_up() {
        let mut core = CartCore::new(4);
        let mut last_p = core.target_recent_size();
        recency_workload(&mut core, |core| {
            let p = core.target_recent_size();
            assert!(p >= last_p, "p fell from {} to {} under recency load", last_p, p);
            last_p = p;
            core.debug_validate_invariants();
        });
        assert!(core.target_recent_size() > 0, "recency workload never raised p");
    }

    #[test]
    fn cart_frequency_workload_drifts_target_down() {
        let mut core = CartCore::new(4);
        recency_workload(&mut core, |_| {});
        let start_p = core.target_recent_size();
        assert!(start_p > 0);

        // A hot set slightly larger than the cache, each key re-requested
        // back to back.
        let hot = ["f0", "f1", "f2", "f3", "f4", "f5"];
        let mut last_p = start_p;
        for round in 0..10 {
            for key in hot {
                for _ in 0..3 {
                    request(&mut core, key, round);
                    let p = core.target_recent_size();
                    assert!(p <= last_p, "p rose from {} to {} under frequency load", last_p, p);
                    last_p = p;
                    core.debug_validate_invariants();
                }
            }
        }
        assert!(
            core.target_recent_size() < start_p,
            "frequency workload did not lower p (start {}, end {})",
            start_p,
            core.target_recent_size()
        );
    }
}
