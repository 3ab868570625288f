//! A fixed set of intrusive doubly linked lists sharing one slot arena.
//!
//! Every node lives in a single `Vec` of slots and is linked into exactly one
//! of `N` lists by `SlotId`. Moving a node between lists relinks it in place,
//! so its `SlotId` stays valid for as long as the node exists. CART keeps its
//! recent, frequent and two history orderings in one `ListSet<_, 4>`.
//!
//! ## Architecture
//!
//! ```text
//!   slots: Vec<Option<Node<T>>>            ends[list] = (head, tail)
//!   ┌────────┬──────────────────────────────────┐
//!   │ SlotId │ Node { value, list, prev, next } │   list 0: head ─► [0] ◄─► [3] ◄─ tail
//!   ├────────┼──────────────────────────────────┤   list 1: head ─► [1] ◄─ tail
//!   │ 0      │ { A, 0, None,    Some(3) }       │   list 2: (empty)
//!   │ 1      │ { B, 1, None,    None    }       │   list 3: head ─► [2] ◄─ tail
//!   │ 2      │ { C, 3, None,    None    }       │
//!   │ 3      │ { D, 0, Some(0), None    }       │   free: [4, 5, ...]
//!   └────────┴──────────────────────────────────┘
//! ```
//!
//! ## Operations
//! - `push_front(list, v)`: O(1), reuses a free slot when available
//! - `move_to_front(id, list)`: O(1) detach + attach, across lists
//! - `remove(id)`: O(1), slot returns to the free stack
//! - `drain()`: empties every list at once
//!
//! `debug_validate_invariants()` is available in debug/test builds.

/// Stable handle to a node in a [`ListSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug)]
struct Node<T> {
    value: T,
    list: usize,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ends {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

/// `N` intrusive lists over one index-stable arena.
#[derive(Debug)]
pub struct ListSet<T, const N: usize> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    ends: [Ends; N],
}

impl<T, const N: usize> ListSet<T, N> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a list set with room for `capacity` nodes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            ends: [Ends::default(); N],
        }
    }

    /// Number of nodes in `list`.
    #[inline]
    pub fn len(&self, list: usize) -> usize {
        self.ends[list].len
    }

    /// Number of nodes across all lists.
    pub fn total_len(&self) -> usize {
        self.ends.iter().map(|e| e.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn front_id(&self, list: usize) -> Option<SlotId> {
        self.ends[list].head
    }

    pub fn back_id(&self, list: usize) -> Option<SlotId> {
        self.ends[list].tail
    }

    /// Returns which list `id` belongs to, if it is live.
    pub fn list_of(&self, id: SlotId) -> Option<usize> {
        self.node(id).map(|node| node.list)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.node(id).map(|node| &node.value)
    }

    /// Inserts `value` at the head of `list`.
    pub fn push_front(&mut self, list: usize, value: T) -> SlotId {
        let node = Node {
            value,
            list,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                SlotId(idx)
            },
            None => {
                self.slots.push(Some(node));
                SlotId(self.slots.len() - 1)
            },
        };
        self.attach_front(id, list);
        id
    }

    /// Relinks `id` at the head of `list`, which may differ from its current
    /// list. Returns `false` if `id` is not live.
    pub fn move_to_front(&mut self, id: SlotId, list: usize) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        if self.ends[list].head == Some(id) {
            return true;
        }
        self.detach(id);
        self.attach_front(id, list);
        true
    }

    /// Unlinks and frees `id`, returning its value.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        self.node(id)?;
        self.detach(id);
        let node = self.slots[id.0].take()?;
        self.free.push(id.0);
        Some(node.value)
    }

    /// Iterates `list` from head to tail.
    pub fn iter(&self, list: usize) -> ListIter<'_, T, N> {
        ListIter {
            set: self,
            current: self.ends[list].head,
        }
    }

    /// Removes every node, yielding values in slot order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.ends = [Ends::default(); N];
        self.slots.drain(..).flatten().map(|node| node.value)
    }

    #[inline]
    fn node(&self, id: SlotId) -> Option<&Node<T>> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    #[inline]
    fn node_mut(&mut self, id: SlotId) -> Option<&mut Node<T>> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    fn detach(&mut self, id: SlotId) {
        let (list, prev, next) = match self.node(id) {
            Some(node) => (node.list, node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_id) => {
                if let Some(prev_node) = self.node_mut(prev_id) {
                    prev_node.next = next;
                }
            },
            None => self.ends[list].head = next,
        }
        match next {
            Some(next_id) => {
                if let Some(next_node) = self.node_mut(next_id) {
                    next_node.prev = prev;
                }
            },
            None => self.ends[list].tail = prev,
        }
        self.ends[list].len -= 1;

        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, id: SlotId, list: usize) {
        let old_head = self.ends[list].head;
        if let Some(node) = self.node_mut(id) {
            node.list = list;
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(head) => {
                if let Some(head_node) = self.node_mut(head) {
                    head_node.prev = Some(id);
                }
            },
            None => self.ends[list].tail = Some(id),
        }
        self.ends[list].head = Some(id);
        self.ends[list].len += 1;
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let mut seen = 0usize;
        for (list, ends) in self.ends.iter().enumerate() {
            if ends.head.is_none() || ends.tail.is_none() {
                assert!(ends.head.is_none() && ends.tail.is_none());
                assert_eq!(ends.len, 0, "list {} has no ends but len {}", list, ends.len);
                continue;
            }

            let mut count = 0usize;
            let mut prev = None;
            let mut current = ends.head;
            while let Some(id) = current {
                let node = self.node(id).expect("linked slot is empty");
                assert_eq!(node.list, list, "slot {} linked into wrong list", id.0);
                assert_eq!(node.prev, prev, "slot {} has broken prev link", id.0);
                if node.next.is_none() {
                    assert_eq!(ends.tail, Some(id));
                }
                prev = Some(id);
                current = node.next;
                count += 1;
                assert!(count <= self.slots.len(), "cycle in list {}", list);
            }
            assert_eq!(count, ends.len, "list {} walk count mismatch", list);
            seen += count;
        }

        let occupied = self.slots.iter().filter(|slot| slot.is_some()).count();
        assert_eq!(seen, occupied, "orphaned slots outside every list");
        assert_eq!(self.free.len() + occupied, self.slots.len());
        for &idx in &self.free {
            assert!(self.slots[idx].is_none(), "free slot {} is occupied", idx);
        }
    }
}

impl<T, const N: usize> Default for ListSet<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over `(SlotId, &T)` pairs of one list, head to tail.
pub struct ListIter<'a, T, const N: usize> {
    set: &'a ListSet<T, N>,
    current: Option<SlotId>,
}

impl<'a, T, const N: usize> Iterator for ListIter<'a, T, N> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let node = self.set.node(id)?;
        self.current = node.next;
        Some((id, &node.value))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Push(usize, u32),
        Move(usize, usize),
        Remove(usize),
        RemoveBack(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, any::<u32>()).prop_map(|(l, v)| Op::Push(l, v)),
            (0usize..64, 0usize..4).prop_map(|(i, l)| Op::Move(i, l)),
            (0usize..64).prop_map(Op::Remove),
            (0usize..4).prop_map(Op::RemoveBack),
        ]
    }

    proptest! {
        /// Arbitrary operation sequences keep every list well-formed.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_arbitrary_ops_maintain_invariants(
            ops in prop::collection::vec(op_strategy(), 0..200)
        ) {
            let mut set: ListSet<u32, 4> = ListSet::new();
            let mut ids: Vec<SlotId> = Vec::new();
            for op in ops {
                match op {
                    Op::Push(list, v) => ids.push(set.push_front(list, v)),
                    Op::Move(i, list) => {
                        if let Some(&id) = ids.get(i) {
                            set.move_to_front(id, list);
                        }
                    },
                    Op::Remove(i) => {
                        if i < ids.len() {
                            let id = ids.swap_remove(i);
                            set.remove(id);
                        }
                    },
                    Op::RemoveBack(list) => {
                        if let Some(id) = set.back_id(list) {
                            ids.retain(|&x| x != id);
                            set.remove(id);
                        }
                    },
                }
                set.debug_validate_invariants();
                prop_assert_eq!(set.total_len(), ids.len());
            }
        }
    }
}
