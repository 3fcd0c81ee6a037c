//! # Sorted Troves
//!
//! A doubly linked list of active trove ids, ordered from the highest to the lowest nominal
//! collateral ratio (NICR). The head is the healthiest trove, the tail the weakest one, so
//! liquidations and redemptions start at the tail.
//!
//! Links live in a [`NodeStore`], which the `TroveManager` backs with a `KeyValueStore`. NICRs are
//! never stored in the list; they are read through a closure so the list always ranks by the
//! current ledger values.
//!
//! Hints only shorten the walk. Any pair of hints, including stale or removed ids, yields the
//! correct position. Troves with equal NICRs keep their insertion order: a new trove ranks below
//! the existing ones it ties with.

use scrypto::prelude::*;

/// Links of a single trove in the list. `None` marks the head (no `prev`) or the tail (no `next`).
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListNode {
    pub prev: Option<u64>,
    pub next: Option<u64>,
}

/// Storage for list links, keyed by trove id.
pub trait NodeStore {
    fn node(&self, id: u64) -> Option<ListNode>;
    fn set_node(&mut self, id: u64, node: ListNode);
    fn remove_node(&mut self, id: u64);
}

impl NodeStore for KeyValueStore<u64, ListNode> {
    fn node(&self, id: u64) -> Option<ListNode> {
        self.get(&id).map(|node| *node)
    }

    fn set_node(&mut self, id: u64, node: ListNode) {
        self.insert(id, node);
    }

    fn remove_node(&mut self, id: u64) {
        self.remove(&id);
    }
}

/// Header of the sorted list.
#[derive(ScryptoSbor, Clone, Debug, PartialEq)]
pub struct SortedTroves {
    pub head: Option<u64>,
    pub tail: Option<u64>,
    pub size: u64,
    pub max_size: u64,
}

impl SortedTroves {
    pub fn new(max_size: u64) -> Self {
        Self {
            head: None,
            tail: None,
            size: 0,
            max_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size >= self.max_size
    }

    pub fn contains(&self, store: &impl NodeStore, id: u64) -> bool {
        store.node(id).is_some()
    }

    /// The trove with the highest NICR.
    pub fn first(&self) -> Option<u64> {
        self.head
    }

    /// The trove with the lowest NICR.
    pub fn last(&self) -> Option<u64> {
        self.tail
    }

    /// The next trove toward the tail (lower NICR).
    pub fn next(&self, store: &impl NodeStore, id: u64) -> Option<u64> {
        store.node(id).and_then(|node| node.next)
    }

    /// The previous trove toward the head (higher NICR).
    pub fn prev(&self, store: &impl NodeStore, id: u64) -> Option<u64> {
        store.node(id).and_then(|node| node.prev)
    }

    /// Inserts a trove at the position matching `nicr`.
    ///
    /// # Arguments
    /// * `store`: Link storage.
    /// * `nicr_of`: Reads the current NICR of a listed trove.
    /// * `id`: Id of the trove to insert.
    /// * `nicr`: NICR of the trove to insert.
    /// * `prev_hint`: Suggested neighbour with a higher or equal NICR.
    /// * `next_hint`: Suggested neighbour with a lower NICR.
    ///
    /// # Panics
    /// * If the list is full.
    /// * If the trove is already listed.
    /// * If `nicr` is zero.
    pub fn insert<S, F>(
        &mut self,
        store: &mut S,
        nicr_of: &F,
        id: u64,
        nicr: Decimal,
        prev_hint: Option<u64>,
        next_hint: Option<u64>,
    ) where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        assert!(!self.is_full(), "Sorted list is full");
        assert!(!self.contains(&*store, id), "Trove already in list");
        assert!(nicr > Decimal::ZERO, "NICR must be positive");

        let (prev, next) = if self.valid_insert_position(&*store, nicr_of, nicr, prev_hint, next_hint) {
            (prev_hint, next_hint)
        } else {
            self.find_insert_position(&*store, nicr_of, nicr, prev_hint, next_hint)
        };

        store.set_node(id, ListNode { prev, next });

        match prev {
            Some(prev) => Self::relink(store, prev, |node| node.next = Some(id)),
            None => self.head = Some(id),
        }
        match next {
            Some(next) => Self::relink(store, next, |node| node.prev = Some(id)),
            None => self.tail = Some(id),
        }

        self.size += 1;
    }

    /// Unlinks a trove.
    ///
    /// # Panics
    /// * If the trove is not listed.
    pub fn remove(&mut self, store: &mut impl NodeStore, id: u64) {
        let Some(node) = store.node(id) else {
            panic!("Trove not in list");
        };

        match node.prev {
            Some(prev) => Self::relink(store, prev, |prev_node| prev_node.next = node.next),
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => Self::relink(store, next, |next_node| next_node.prev = node.prev),
            None => self.tail = node.prev,
        }

        store.remove_node(id);
        self.size -= 1;
    }

    /// Moves a listed trove to the position matching its new NICR.
    pub fn re_insert<S, F>(
        &mut self,
        store: &mut S,
        nicr_of: &F,
        id: u64,
        new_nicr: Decimal,
        prev_hint: Option<u64>,
        next_hint: Option<u64>,
    ) where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        assert!(self.contains(&*store, id), "Trove not in list");
        assert!(new_nicr > Decimal::ZERO, "NICR must be positive");

        self.remove(store, id);
        self.insert(store, nicr_of, id, new_nicr, prev_hint, next_hint);
    }

    /// Checks whether `(prev, next)` is exactly the slot a trove with `nicr` belongs in.
    pub fn valid_insert_position<S, F>(
        &self,
        store: &S,
        nicr_of: &F,
        nicr: Decimal,
        prev: Option<u64>,
        next: Option<u64>,
    ) -> bool
    where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        match (prev, next) {
            (None, None) => self.is_empty(),
            (None, Some(next)) => self.head == Some(next) && nicr > nicr_of(next),
            (Some(prev), None) => self.tail == Some(prev) && nicr <= nicr_of(prev),
            (Some(prev), Some(next)) => {
                self.next(store, prev) == Some(next)
                    && nicr_of(prev) >= nicr
                    && nicr > nicr_of(next)
            }
        }
    }

    /// Finds the `(prev, next)` slot for `nicr`, starting from whichever hint is still usable.
    ///
    /// A hint is usable if it is listed and lies on the correct side of `nicr`. Without any usable
    /// hint the walk starts at the head.
    pub fn find_insert_position<S, F>(
        &self,
        store: &S,
        nicr_of: &F,
        nicr: Decimal,
        prev_hint: Option<u64>,
        next_hint: Option<u64>,
    ) -> (Option<u64>, Option<u64>)
    where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        let prev = prev_hint.filter(|prev| self.contains(store, *prev) && nicr <= nicr_of(*prev));
        let next = next_hint.filter(|next| self.contains(store, *next) && nicr > nicr_of(*next));

        match (prev, next) {
            (Some(prev), _) => self.descend_from(store, nicr_of, nicr, prev),
            (None, Some(next)) => self.ascend_from(store, nicr_of, nicr, next),
            (None, None) => match self.head {
                None => (None, None),
                Some(head) if nicr > nicr_of(head) => (None, Some(head)),
                Some(head) => self.descend_from(store, nicr_of, nicr, head),
            },
        }
    }

    /// Collects up to `count` ids starting at `start` (or the head) toward the tail.
    pub fn collect(&self, store: &impl NodeStore, start: Option<u64>, count: u64) -> Vec<u64> {
        let mut ids = vec![];
        let mut current = start.filter(|id| self.contains(store, *id)).or(self.head);
        while let Some(id) = current {
            if ids.len() as u64 >= count {
                break;
            }
            ids.push(id);
            current = self.next(store, id);
        }
        ids
    }

    /// Samples listed troves and returns the one whose NICR is closest to `nicr`.
    ///
    /// The tail is always the first candidate. The remaining `num_trials - 1` candidates are drawn
    /// through `trove_at`, which maps an index below `count` to a listed trove id. Indices come from
    /// a blake2b hash chain seeded with `seed`.
    ///
    /// # Returns
    /// * `(hint, distance, latest_seed)`, where `hint` is `None` for an empty list.
    pub fn approx_hint<F, G>(
        &self,
        count: u64,
        trove_at: G,
        nicr_of: &F,
        nicr: Decimal,
        num_trials: u64,
        seed: u64,
    ) -> (Option<u64>, Decimal, u64)
    where
        F: Fn(u64) -> Decimal,
        G: Fn(u64) -> u64,
    {
        let Some(tail) = self.tail else {
            return (None, Decimal::ZERO, seed);
        };

        let mut hint = tail;
        let mut distance = abs_diff(nicr_of(tail), nicr);
        let mut latest_seed = seed;

        if count > 0 {
            for _ in 1..num_trials {
                latest_seed = next_seed(latest_seed);
                let candidate = trove_at(latest_seed % count);
                let candidate_distance = abs_diff(nicr_of(candidate), nicr);
                if candidate_distance < distance {
                    hint = candidate;
                    distance = candidate_distance;
                }
            }
        }

        (Some(hint), distance, latest_seed)
    }

    fn descend_from<S, F>(
        &self,
        store: &S,
        nicr_of: &F,
        nicr: Decimal,
        start: u64,
    ) -> (Option<u64>, Option<u64>)
    where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        let mut prev = start;
        loop {
            match self.next(store, prev) {
                None => return (Some(prev), None),
                Some(next) if nicr > nicr_of(next) => return (Some(prev), Some(next)),
                Some(next) => prev = next,
            }
        }
    }

    fn ascend_from<S, F>(
        &self,
        store: &S,
        nicr_of: &F,
        nicr: Decimal,
        start: u64,
    ) -> (Option<u64>, Option<u64>)
    where
        S: NodeStore,
        F: Fn(u64) -> Decimal,
    {
        let mut next = start;
        loop {
            match self.prev(store, next) {
                None => return (None, Some(next)),
                Some(prev) if nicr <= nicr_of(prev) => return (Some(prev), Some(next)),
                Some(prev) => next = prev,
            }
        }
    }

    fn relink(store: &mut impl NodeStore, id: u64, update: impl FnOnce(&mut ListNode)) {
        if let Some(mut node) = store.node(id) {
            update(&mut node);
            store.set_node(id, node);
        }
    }
}

fn abs_diff(a: Decimal, b: Decimal) -> Decimal {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Next value of the hint sampler's hash chain.
pub fn next_seed(seed: u64) -> u64 {
    let digest = hash(seed.to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemoryStore(BTreeMap<u64, ListNode>);

    impl NodeStore for MemoryStore {
        fn node(&self, id: u64) -> Option<ListNode> {
            self.0.get(&id).copied()
        }

        fn set_node(&mut self, id: u64, node: ListNode) {
            self.0.insert(id, node);
        }

        fn remove_node(&mut self, id: u64) {
            self.0.remove(&id);
        }
    }

    fn ratios(values: &[(u64, i64)]) -> BTreeMap<u64, Decimal> {
        values
            .iter()
            .map(|(id, nicr)| (*id, Decimal::from(*nicr)))
            .collect()
    }

    fn assert_ordered(list: &SortedTroves, store: &MemoryStore, nicrs: &BTreeMap<u64, Decimal>) {
        let ids = list.collect(store, None, u64::MAX);
        assert_eq!(ids.len() as u64, list.size);
        for pair in ids.windows(2) {
            assert!(nicrs[&pair[0]] >= nicrs[&pair[1]]);
        }
        assert_eq!(list.first(), ids.first().copied());
        assert_eq!(list.last(), ids.last().copied());
    }

    #[test]
    fn inserts_without_hints_keep_descending_order() {
        let nicrs = ratios(&[(1, 5), (2, 9), (3, 1), (4, 7), (5, 5)]);
        let nicr_of = |id: u64| nicrs[&id];
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);

        for id in 1..=5 {
            list.insert(&mut store, &nicr_of, id, nicrs[&id], None, None);
        }

        assert_ordered(&list, &store, &nicrs);
        assert_eq!(list.collect(&store, None, 10), vec![2, 4, 1, 5, 3]);
    }

    #[test]
    fn equal_ratios_rank_below_existing_ones() {
        let nicrs = ratios(&[(1, 3), (2, 3), (3, 3)]);
        let nicr_of = |id: u64| nicrs[&id];
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);

        list.insert(&mut store, &nicr_of, 1, nicrs[&1], None, None);
        list.insert(&mut store, &nicr_of, 2, nicrs[&2], None, Some(1));
        list.insert(&mut store, &nicr_of, 3, nicrs[&3], Some(1), Some(2));

        assert_eq!(list.collect(&store, None, 10), vec![1, 2, 3]);
    }

    #[test]
    fn stale_and_wrong_hints_are_corrected() {
        let nicrs = ratios(&[(1, 10), (2, 8), (3, 6), (4, 4), (5, 2), (6, 5)]);
        let nicr_of = |id: u64| nicrs[&id];
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);

        for id in 1..=5 {
            list.insert(&mut store, &nicr_of, id, nicrs[&id], None, None);
        }

        // hints on the wrong side, plus an id that was never listed
        list.insert(&mut store, &nicr_of, 6, nicrs[&6], Some(5), Some(42));
        assert_eq!(list.collect(&store, None, 10), vec![1, 2, 3, 6, 4, 5]);

        assert_eq!(
            list.find_insert_position(&store, &nicr_of, dec!(7), None, Some(5)),
            (Some(2), Some(3))
        );
        assert_eq!(
            list.find_insert_position(&store, &nicr_of, dec!(11), Some(1), None),
            (None, Some(1))
        );
        assert_eq!(
            list.find_insert_position(&store, &nicr_of, dec!(1), Some(3), None),
            (Some(5), None)
        );
    }

    #[test]
    fn valid_insert_position_checks_adjacency() {
        let nicrs = ratios(&[(1, 10), (2, 8), (3, 6)]);
        let nicr_of = |id: u64| nicrs[&id];
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);
        for id in 1..=3 {
            list.insert(&mut store, &nicr_of, id, nicrs[&id], None, None);
        }

        assert!(list.valid_insert_position(&store, &nicr_of, dec!(9), Some(1), Some(2)));
        assert!(list.valid_insert_position(&store, &nicr_of, dec!(8), Some(2), Some(3)));
        assert!(!list.valid_insert_position(&store, &nicr_of, dec!(8), Some(1), Some(2)));
        assert!(!list.valid_insert_position(&store, &nicr_of, dec!(9), Some(1), Some(3)));
        assert!(list.valid_insert_position(&store, &nicr_of, dec!(11), None, Some(1)));
        assert!(list.valid_insert_position(&store, &nicr_of, dec!(6), Some(3), None));
        assert!(!list.valid_insert_position(&store, &nicr_of, dec!(6), None, None));
    }

    #[test]
    fn remove_and_re_insert_update_head_and_tail() {
        let mut nicrs = ratios(&[(1, 10), (2, 8), (3, 6)]);
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);
        {
            let nicr_of = |id: u64| nicrs[&id];
            for id in 1..=3 {
                list.insert(&mut store, &nicr_of, id, nicrs[&id], None, None);
            }
        }

        list.remove(&mut store, 1);
        assert_eq!(list.first(), Some(2));
        list.remove(&mut store, 3);
        assert_eq!(list.last(), Some(2));
        assert_eq!(list.size, 1);

        nicrs.insert(1, dec!(3));
        let nicr_of = |id: u64| nicrs[&id];
        list.insert(&mut store, &nicr_of, 1, nicrs[&1], None, None);
        assert_eq!(list.collect(&store, None, 10), vec![2, 1]);

        list.re_insert(&mut store, &nicr_of, 1, dec!(20), Some(2), None);
        assert_eq!(list.collect(&store, None, 10), vec![1, 2]);
    }

    #[test]
    #[should_panic(expected = "Trove already in list")]
    fn duplicate_insert_panics() {
        let nicr_of = |_: u64| dec!(1);
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);
        list.insert(&mut store, &nicr_of, 1, dec!(1), None, None);
        list.insert(&mut store, &nicr_of, 1, dec!(1), None, None);
    }

    #[test]
    #[should_panic(expected = "Sorted list is full")]
    fn insert_into_full_list_panics() {
        let nicr_of = |_: u64| dec!(1);
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(1);
        list.insert(&mut store, &nicr_of, 1, dec!(1), None, None);
        list.insert(&mut store, &nicr_of, 2, dec!(1), None, None);
    }

    #[test]
    #[should_panic(expected = "Trove not in list")]
    fn removing_missing_trove_panics() {
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(1);
        list.remove(&mut store, 7);
    }

    #[test]
    #[should_panic(expected = "NICR must be positive")]
    fn zero_nicr_panics() {
        let nicr_of = |_: u64| dec!(1);
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(10);
        list.insert(&mut store, &nicr_of, 1, Decimal::ZERO, None, None);
    }

    #[test]
    fn approx_hint_finds_an_exact_match_and_is_deterministic() {
        let nicrs: BTreeMap<u64, Decimal> = (1..=50u64).map(|id| (id, Decimal::from(id))).collect();
        let nicr_of = |id: u64| nicrs[&id];
        let mut store = MemoryStore::default();
        let mut list = SortedTroves::new(100);
        for id in 1..=50 {
            list.insert(&mut store, &nicr_of, id, nicrs[&id], None, None);
        }

        let (hint, distance, seed) = list.approx_hint(50, |index| index + 1, &nicr_of, dec!(1), 5, 42);
        assert_eq!(hint, Some(1));
        assert_eq!(distance, Decimal::ZERO);

        let first = list.approx_hint(50, |index| index + 1, &nicr_of, dec!(25), 30, 7);
        let second = list.approx_hint(50, |index| index + 1, &nicr_of, dec!(25), 30, 7);
        assert_eq!(first, second);
        assert!(first.1 < dec!(24));
        assert_ne!(seed, 42);
    }
}
