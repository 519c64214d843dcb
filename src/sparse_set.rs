//sparse_set.rs
use crate::arena::TupleId;
use rustc_hash::FxHashMap as HashMap;

/// Dense list of tuple entries with O(1) insert, lookup and swap-remove.
///
/// Iteration follows the dense array, which only depends on the sequence of
/// puts and removes, so visits are deterministic for a given history.
#[derive(Debug)]
pub struct SparseSet<V> {
    dense: Vec<(TupleId, V)>,
    sparse: HashMap<TupleId, usize>,
}

impl<V> SparseSet<V> {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: HashMap::default(),
        }
    }

    /// Returns false, leaving the set unchanged, if `tuple` is already present.
    #[inline]
    pub fn insert(&mut self, tuple: TupleId, value: V) -> bool {
        if self.sparse.contains_key(&tuple) {
            return false;
        }
        self.sparse.insert(tuple, self.dense.len());
        self.dense.push((tuple, value));
        true
    }

    #[inline]
    pub fn get(&self, tuple: TupleId) -> Option<&V> {
        self.sparse.get(&tuple).map(|&idx| &self.dense[idx].1)
    }

    #[inline]
    pub fn get_mut(&mut self, tuple: TupleId) -> Option<&mut V> {
        match self.sparse.get(&tuple) {
            Some(&idx) => Some(&mut self.dense[idx].1),
            None => None,
        }
    }

    #[inline]
    pub fn remove(&mut self, tuple: TupleId) -> Option<V> {
        let dense_idx = self.sparse.remove(&tuple)?;
        let (_, value) = self.dense.swap_remove(dense_idx);
        if let Some((moved, _)) = self.dense.get(dense_idx) {
            self.sparse.insert(*moved, dense_idx);
        }
        Some(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TupleId, &V)> {
        self.dense.iter().map(|(tuple, value)| (*tuple, value))
    }
}

impl<V> Default for SparseSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::TupleArena;
    use crate::tuple::AnyTuple;
    use std::rc::Rc;

    #[test]
    fn swap_remove_keeps_positions_consistent() {
        let mut arena = TupleArena::new();
        let ids: Vec<TupleId> = (0..4)
            .map(|i| arena.acquire(AnyTuple::uni(Rc::new(i as i64))).unwrap())
            .collect();

        let mut set = SparseSet::new();
        for (i, id) in ids.iter().enumerate() {
            assert!(set.insert(*id, i));
        }
        assert!(!set.insert(ids[0], 99));

        assert_eq!(set.remove(ids[0]), Some(0));
        assert_eq!(set.remove(ids[0]), None);
        assert_eq!(set.get(ids[3]), Some(&3));
        *set.get_mut(ids[3]).unwrap() = 30;
        assert_eq!(set.remove(ids[3]), Some(30));
        assert_eq!(set.len(), 2);

        let remaining: Vec<usize> = set.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2, 1]);
    }
}
