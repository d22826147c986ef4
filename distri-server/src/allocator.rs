//! Choosing which work item a connection receives next.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::session::{RemainingSet, SessionStore};

/// Below this share of the session left in the remaining set, the allocator
/// walks the set instead of sampling it.
const SCAN_DIVISOR: usize = 20;

/// Picks a uniformly random unsaturated work item.
#[derive(Debug)]
pub struct IndexAllocator {
    rng: StdRng,
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Assign one worker to an item with spare capacity.
    ///
    /// `settled` is the number of items that are solved or awaiting a
    /// verification decision; when that covers the session there is nothing
    /// to hand out. On success the item's worker count is incremented and
    /// the index leaves `remaining` once the item is saturated. Saturated
    /// indices met along the way are pruned from `remaining`.
    pub fn next(
        &mut self,
        store: &mut SessionStore,
        remaining: &mut RemainingSet,
        settled: usize,
    ) -> Option<usize> {
        if remaining.is_empty() || settled >= store.len() {
            return None;
        }

        let index = if remaining.len() * SCAN_DIVISOR < store.len() {
            self.scan(store, remaining)
        } else {
            self.sample(store, remaining)
        }?;

        store.assign(index);
        if store.is_saturated(index) {
            remaining.remove(index);
        }
        Some(index)
    }

    // Rejection sampling, bounded by the set's size on entry. Every failed
    // draw shrinks the set, so the bound is never the limiting factor unless
    // the whole set is stale, in which case the scan finishes the job.
    fn sample(&mut self, store: &SessionStore, remaining: &mut RemainingSet) -> Option<usize> {
        for _ in 0..remaining.len() {
            let candidate = remaining.sample(&mut self.rng)?;
            if !store.is_saturated(candidate) {
                return Some(candidate);
            }
            remaining.remove(candidate);
        }
        self.scan(store, remaining)
    }

    fn scan(&mut self, store: &SessionStore, remaining: &mut RemainingSet) -> Option<usize> {
        if remaining.is_empty() {
            return None;
        }
        let start = self.rng.gen_range(0..remaining.len());

        let mut stale = Vec::new();
        let mut found = None;
        for candidate in remaining.iter_from(start) {
            if store.is_saturated(candidate) {
                stale.push(candidate);
            } else {
                found = Some(candidate);
                break;
            }
        }

        for index in stale {
            remaining.remove(index);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn session(len: usize, strength: usize) -> (SessionStore, RemainingSet) {
        let mut store = SessionStore::dynamic(strength);
        let added = store.add((0..len).map(|i| json!(i)).collect()).unwrap();
        let mut remaining = RemainingSet::new();
        remaining.extend(added.indices);
        (store, remaining)
    }

    fn assert_capacity(store: &SessionStore) {
        for index in 0..store.len() {
            assert!(store.occupancy(index) <= store.strength());
        }
    }

    #[test]
    fn test_hands_out_each_slot_once() {
        let (mut store, mut remaining) = session(50, 3);
        let mut allocator = IndexAllocator::with_seed(11);

        let mut counts = vec![0; 50];
        while let Some(index) = allocator.next(&mut store, &mut remaining, 0) {
            counts[index] += 1;
            assert_capacity(&store);
        }

        assert!(counts.iter().all(|&c| c == 3));
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_saturated_items_leave_remaining() {
        let (mut store, mut remaining) = session(1, 2);
        let mut allocator = IndexAllocator::with_seed(1);

        assert_eq!(allocator.next(&mut store, &mut remaining, 0), Some(0));
        assert!(remaining.contains(0));
        assert_eq!(allocator.next(&mut store, &mut remaining, 0), Some(0));
        assert!(!remaining.contains(0));
        assert_eq!(allocator.next(&mut store, &mut remaining, 0), None);
    }

    #[test]
    fn test_settled_session_has_no_work() {
        let (mut store, mut remaining) = session(2, 1);
        let mut allocator = IndexAllocator::with_seed(3);
        assert_eq!(allocator.next(&mut store, &mut remaining, 2), None);
        assert_eq!(store.assigned_workers(0), 0);
        assert_eq!(store.assigned_workers(1), 0);
    }

    #[test]
    fn test_stale_members_are_pruned() {
        let (mut store, mut remaining) = session(100, 1);
        // Saturate everything behind the set's back except index 42.
        for index in 0..100 {
            if index != 42 {
                store.assign(index);
            }
        }

        let mut allocator = IndexAllocator::with_seed(5);
        assert_eq!(allocator.next(&mut store, &mut remaining, 0), Some(42));
        assert!(remaining.is_empty());
        assert_eq!(allocator.next(&mut store, &mut remaining, 0), None);
    }

    #[test]
    fn test_scan_mode_near_exhaustion() {
        let (mut store, mut remaining) = session(1000, 1);
        let mut allocator = IndexAllocator::with_seed(9);
        for _ in 0..990 {
            allocator.next(&mut store, &mut remaining, 0).unwrap();
        }
        assert_eq!(remaining.len(), 10);

        let mut seen = HashSet::new();
        while let Some(index) = allocator.next(&mut store, &mut remaining, 0) {
            assert!(seen.insert(index));
        }
        assert_eq!(seen.len(), 10);
        assert_capacity(&store);
    }

    #[test]
    fn test_spreads_load() {
        let (mut store, mut remaining) = session(4, 1000);
        let mut allocator = IndexAllocator::with_seed(21);
        for _ in 0..400 {
            allocator.next(&mut store, &mut remaining, 0).unwrap();
        }
        for index in 0..4 {
            assert!(store.assigned_workers(index) > 50);
        }
    }
}
