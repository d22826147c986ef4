//! Set of work indices that still have capacity.

use rand::Rng;

const ABSENT: u32 = u32::MAX;

/// Indices whose work item can still take another worker.
///
/// Members are kept in a dense vector so a uniform sample is a single random
/// index, and a position table makes insert, remove, and membership O(1).
/// Removal swaps the last member into the hole.
#[derive(Debug, Default, Clone)]
pub struct RemainingSet {
    members: Vec<usize>,
    positions: Vec<u32>,
}

impl RemainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.positions.get(index).is_some_and(|&p| p != ABSENT)
    }

    /// Add `index`; returns false if it was already present.
    pub fn insert(&mut self, index: usize) -> bool {
        if self.contains(index) {
            return false;
        }
        if index >= self.positions.len() {
            self.positions.resize(index + 1, ABSENT);
        }
        self.positions[index] = self.members.len() as u32;
        self.members.push(index);
        true
    }

    /// Remove `index`; returns false if it was not present.
    pub fn remove(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        let position = self.positions[index] as usize;
        self.members.swap_remove(position);
        if let Some(&moved) = self.members.get(position) {
            self.positions[moved] = position as u32;
        }
        self.positions[index] = ABSENT;
        true
    }

    /// Pick a member uniformly at random.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.members.is_empty() {
            None
        } else {
            Some(self.members[rng.gen_range(0..self.members.len())])
        }
    }

    /// Members in storage order, starting at `start` and wrapping around.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = usize> + '_ {
        let len = self.members.len();
        (0..len).map(move |i| self.members[(start + i) % len])
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.positions.clear();
    }
}

impl Extend<usize> for RemainingSet {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        for index in iter {
            self.insert(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut set = RemainingSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_keeps_positions_consistent() {
        let mut set = RemainingSet::new();
        set.extend(0..5);
        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert!(set.remove(4));
        assert!(set.remove(0));

        let mut left: Vec<_> = set.iter().collect();
        left.sort();
        assert_eq!(left, vec![2, 3]);
        assert!(set.contains(2));
        assert!(!set.contains(4));
        assert!(!set.contains(100));

        assert!(set.insert(4));
        assert!(set.remove(2));
        let mut left: Vec<_> = set.iter().collect();
        left.sort();
        assert_eq!(left, vec![3, 4]);
    }

    #[test]
    fn test_sample_only_returns_members() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut set = RemainingSet::new();
        assert_eq!(set.sample(&mut rng), None);

        set.extend([10, 20, 30]);
        set.remove(20);
        for _ in 0..100 {
            let picked = set.sample(&mut rng).unwrap();
            assert!(picked == 10 || picked == 30);
        }
    }

    #[test]
    fn test_iter_from_wraps() {
        let mut set = RemainingSet::new();
        set.extend([5, 6, 7]);
        let order: Vec<_> = set.iter_from(2).collect();
        assert_eq!(order, vec![7, 5, 6]);
    }
}
