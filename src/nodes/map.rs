//nodes/map.rs
use super::lifecycle::{kill_tuple, mark_updated, propagate_dirty_tuples, unchanged};
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use crate::stream_def::{Lambda, Mapper};
use crate::tuple::{AnyTuple, FactList};
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

/// Replaces each input tuple by one tuple of `arity` computed facts.
pub struct MapNode {
    pub children: Vec<Downstream>,
    mapper: Lambda<Mapper>,
    arity: usize,
    outputs: HashMap<TupleId, TupleId>,
    dirty: Vec<TupleId>,
}

impl MapNode {
    pub fn new(mapper: Lambda<Mapper>, arity: usize) -> Self {
        Self {
            children: Vec::new(),
            mapper,
            arity,
            outputs: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    fn map(&self, tuple: &AnyTuple) -> Result<FactList> {
        let facts = (self.mapper)(tuple);
        if facts.len() != self.arity {
            return Err(ScorenetError::invalid_arity(self.arity, facts.len()));
        }
        Ok(facts)
    }

    pub fn insert(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.outputs.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into a map node",
                tuple
            )));
        }
        let facts = self.map(tuples.get(tuple)?)?;
        let output = tuples.acquire(AnyTuple::from_facts(facts)?)?;
        self.outputs.insert(tuple, output);
        self.dirty.push(output);
        Ok(())
    }

    /// Suppressed only when the mapper returns equal but distinct facts. A mapper
    /// that hands back the very same `Rc` may be exposing a fact that changed in
    /// place, and the stored copy compares equal to it, so that case always propagates.
    pub fn update(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let output = match self.outputs.get(&tuple) {
            Some(output) => *output,
            None => return self.insert(tuple, tuples),
        };
        let facts = self.map(tuples.get(tuple)?)?;
        if unchanged(&tuples.get(output)?.facts(), &facts) {
            return Ok(());
        }
        tuples.get_mut(output)?.replace_facts(facts)?;
        mark_updated(output, tuples, &mut self.dirty)
    }

    pub fn retract(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        match self.outputs.remove(&tuple) {
            Some(output) => kill_tuple(output, tuples, &mut self.dirty),
            None => Ok(()),
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

impl fmt::Debug for MapNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapNode")
            .field("children", &self.children)
            .field("mapper", &self.mapper)
            .field("arity", &self.arity)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
