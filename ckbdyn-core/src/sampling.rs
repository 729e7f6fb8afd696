//! Indexed set with O(1) membership and O(1) uniform sampling by position.
//!
//! Backs every collection the engine samples from: alive nodes, available
//! communities, per-community member and edge sets, and the solver's
//! fresh-assignment set. Removal swaps the last element into the vacated
//! slot, so positions other than the removed one and the last are stable.

use std::{collections::HashMap, hash::Hash};

/// Set of elements addressable by a dense position index.
#[derive(Clone, Debug, Default)]
pub(crate) struct IndexedSet<T> {
    items: Vec<T>,
    positions: HashMap<T, usize>,
}

impl<T: Copy + Eq + Hash> IndexedSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Inserts `item`, returning `false` if it was already present.
    pub(crate) fn insert(&mut self, item: T) -> bool {
        if self.positions.contains_key(&item) {
            return false;
        }
        self.positions.insert(item, self.items.len());
        self.items.push(item);
        true
    }

    /// Removes `item` by swapping the last element into its slot.
    ///
    /// Returns `false` if the item was not present.
    pub(crate) fn remove(&mut self, item: T) -> bool {
        let Some(position) = self.positions.remove(&item) else {
            return false;
        };
        let last = self.items.len() - 1;
        if position != last {
            let moved = self.items[last];
            self.items[position] = moved;
            self.positions.insert(moved, position);
        }
        self.items.pop();
        true
    }

    pub(crate) fn contains(&self, item: T) -> bool {
        self.positions.contains_key(&item)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the element currently at `position`.
    ///
    /// Panics if `position >= len()`; callers draw positions from
    /// `0..len()`.
    pub(crate) fn at(&self, position: usize) -> T {
        self.items[position]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::IndexedSet;

    #[test]
    fn insert_is_idempotent() {
        let mut set = IndexedSet::new();
        assert!(set.insert(7));
        assert!(!set.insert(7));
        assert_eq!(set.len(), 1);
        assert!(set.contains(7));
    }

    #[test]
    fn remove_swaps_last_into_hole() {
        let mut set = IndexedSet::new();
        for value in [10, 20, 30, 40] {
            set.insert(value);
        }
        assert!(set.remove(20));
        // 40 was last and takes position 1; 10 and 30 keep their slots.
        assert_eq!(set.at(0), 10);
        assert_eq!(set.at(1), 40);
        assert_eq!(set.at(2), 30);
        assert_eq!(set.len(), 3);
    }

    #[rstest]
    #[case(10)]
    #[case(40)]
    fn remove_of_boundary_elements_preserves_the_rest(#[case] victim: u32) {
        let mut set = IndexedSet::new();
        for value in [10, 20, 30, 40] {
            set.insert(value);
        }
        assert!(set.remove(victim));
        let remaining: HashSet<u32> = set.iter().copied().collect();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.contains(&victim));
    }

    #[test]
    fn remove_of_absent_element_is_a_no_op() {
        let mut set = IndexedSet::new();
        set.insert(1);
        assert!(!set.remove(2));
        assert_eq!(set.len(), 1);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Insert),
            any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_a_set(ops in proptest::collection::vec(op_strategy(), 0..256)) {
            let mut set = IndexedSet::new();
            let mut model: HashSet<u8> = HashSet::new();

            for op in ops {
                match op {
                    Op::Insert(value) => {
                        prop_assert_eq!(set.insert(value), model.insert(value));
                    }
                    Op::Remove(value) => {
                        prop_assert_eq!(set.remove(value), model.remove(&value));
                    }
                }

                prop_assert_eq!(set.len(), model.len());
                let dense: HashSet<u8> = set.iter().copied().collect();
                prop_assert_eq!(&dense, &model);
                for position in 0..set.len() {
                    prop_assert!(model.contains(&set.at(position)));
                }
            }
        }
    }
}
