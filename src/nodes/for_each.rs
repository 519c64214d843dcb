//nodes/for_each.rs
use super::lifecycle::{kill_tuple, mark_updated, propagate_dirty_tuples};
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use rustc_hash::FxHashMap as HashMap;
use std::any::TypeId;

/// Leaf of the network: one tuple per inserted fact of a single type.
#[derive(Debug)]
pub struct ForEachNode {
    pub children: Vec<Downstream>,
    fact_type: TypeId,
    type_name: &'static str,
    tuples_by_fact: HashMap<i64, TupleId>,
    dirty: Vec<TupleId>,
}

impl ForEachNode {
    pub fn new(fact_type: TypeId, type_name: &'static str) -> Self {
        Self {
            children: Vec::new(),
            fact_type,
            type_name,
            tuples_by_fact: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    pub fn fact_type(&self) -> TypeId {
        self.fact_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Tuple currently carrying the fact with this id.
    pub fn tuple_of(&self, fact_id: i64) -> Option<TupleId> {
        self.tuples_by_fact.get(&fact_id).copied()
    }

    /// Tuples of every fact currently known to this node.
    pub fn tuple_ids(&self) -> impl Iterator<Item = TupleId> + '_ {
        self.tuples_by_fact.values().copied()
    }

    pub fn len(&self) -> usize {
        self.tuples_by_fact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples_by_fact.is_empty()
    }

    fn fact_id(tuple: TupleId, tuples: &TupleArena) -> Result<i64> {
        Ok(tuples.get(tuple)?.last_fact().fact_id())
    }

    pub fn insert(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let fact_id = Self::fact_id(tuple, tuples)?;
        if self.tuples_by_fact.contains_key(&fact_id) {
            return Err(ScorenetError::duplicate_fact(self.type_name, fact_id));
        }
        self.tuples_by_fact.insert(fact_id, tuple);
        self.dirty.push(tuple);
        Ok(())
    }

    pub fn update(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let fact_id = Self::fact_id(tuple, tuples)?;
        match self.tuples_by_fact.get(&fact_id) {
            Some(known) if *known == tuple => mark_updated(tuple, tuples, &mut self.dirty),
            _ => Err(ScorenetError::fact_not_found(self.type_name, fact_id)),
        }
    }

    pub fn retract(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let fact_id = Self::fact_id(tuple, tuples)?;
        match self.tuples_by_fact.get(&fact_id) {
            Some(known) if *known == tuple => {
                self.tuples_by_fact.remove(&fact_id);
                kill_tuple(tuple, tuples, &mut self.dirty)
            }
            _ => Err(ScorenetError::fact_not_found(self.type_name, fact_id)),
        }
    }

    pub fn propagate(
        &mut self,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<usize> {
        propagate_dirty_tuples(&mut self.dirty, &self.children, tuples, operations)
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::*;
    use crate::state::TupleState;
    use crate::tuple::AnyTuple;

    fn node() -> ForEachNode {
        ForEachNode::new(TypeId::of::<Item>(), "Item")
    }

    #[test]
    fn insert_then_retract_before_flush_is_silent() {
        let mut tuples = TupleArena::new();
        let mut node = node();
        let tuple = tuples.acquire(AnyTuple::uni(item(1, 0, 0))).unwrap();
        node.insert(tuple, &mut tuples).unwrap();
        node.retract(tuple, &mut tuples).unwrap();

        let mut operations = Vec::new();
        node.propagate(&mut tuples, &mut operations).unwrap();
        assert_eq!(operations, vec![NodeOperation::Release(tuple)]);
        assert!(node.is_empty());
    }

    #[test]
    fn duplicate_fact_ids_are_rejected() {
        let mut tuples = TupleArena::new();
        let mut node = node();
        let first = tuples.acquire(AnyTuple::uni(item(1, 0, 0))).unwrap();
        let second = tuples.acquire(AnyTuple::uni(item(1, 0, 5))).unwrap();
        node.insert(first, &mut tuples).unwrap();
        assert!(matches!(
            node.insert(second, &mut tuples),
            Err(ScorenetError::DuplicateFact { fact_id: 1, .. })
        ));
        assert_eq!(node.tuple_of(1), Some(first));
    }

    #[test]
    fn update_after_propagation_emits_update() {
        let mut tuples = TupleArena::new();
        let mut node = node();
        let tuple = tuples.acquire(AnyTuple::uni(item(1, 0, 0))).unwrap();
        node.insert(tuple, &mut tuples).unwrap();
        let mut operations = Vec::new();
        node.propagate(&mut tuples, &mut operations).unwrap();
        assert_eq!(tuples.state(tuple).unwrap(), TupleState::Ok);

        node.update(tuple, &mut tuples).unwrap();
        assert_eq!(node.pending(), 1);
        node.propagate(&mut tuples, &mut operations).unwrap();
        assert_eq!(tuples.state(tuple).unwrap(), TupleState::Ok);
        assert_eq!(node.pending(), 0);
    }
}
