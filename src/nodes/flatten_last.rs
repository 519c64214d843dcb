//nodes/flatten_last.rs
use super::lifecycle::{kill_tuple, mark_updated, propagate_dirty_tuples};
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use crate::fact::{facts_equal, Fact};
use crate::stream_def::{Flattener, Lambda};
use crate::tuple::{AnyTuple, FactList};
use rustc_hash::FxHashMap as HashMap;
use std::fmt;
use std::rc::Rc;

/// Expands the last fact of each tuple into one output per element.
pub struct FlattenLastNode {
    pub children: Vec<Downstream>,
    flattener: Lambda<Flattener>,
    outputs: HashMap<TupleId, Vec<TupleId>>,
    dirty: Vec<TupleId>,
}

impl FlattenLastNode {
    pub fn new(flattener: Lambda<Flattener>) -> Self {
        Self {
            children: Vec::new(),
            flattener,
            outputs: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    fn expand(&self, tuple: &AnyTuple) -> (FactList, Vec<Rc<dyn Fact>>) {
        let mut prefix = tuple.facts();
        let last = prefix.pop();
        let elements = last.map(|fact| (self.flattener)(&fact)).unwrap_or_default();
        (prefix, elements)
    }

    fn create_outputs(
        &mut self,
        prefix: &FactList,
        elements: Vec<Rc<dyn Fact>>,
        tuples: &mut TupleArena,
    ) -> Result<Vec<TupleId>> {
        let mut created = Vec::with_capacity(elements.len());
        for element in elements {
            let mut facts = prefix.clone();
            facts.push(element);
            let output = tuples.acquire(AnyTuple::from_facts(facts)?)?;
            self.dirty.push(output);
            created.push(output);
        }
        Ok(created)
    }

    pub fn insert(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.outputs.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into a flatten node",
                tuple
            )));
        }
        let (prefix, elements) = self.expand(tuples.get(tuple)?);
        let created = self.create_outputs(&prefix, elements, tuples)?;
        self.outputs.insert(tuple, created);
        Ok(())
    }

    /// Outputs are updated in place when the flattened elements are the same,
    /// and replaced wholesale otherwise. Either way every output is re-sent, since
    /// an element may be the same `Rc` as before with changed contents.
    pub fn update(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let previous = match self.outputs.remove(&tuple) {
            Some(previous) => previous,
            None => return self.insert(tuple, tuples),
        };
        let (prefix, elements) = self.expand(tuples.get(tuple)?);
        let mut previous_elements = Vec::with_capacity(previous.len());
        for output in &previous {
            previous_elements.push(tuples.get(*output)?.last_fact().clone());
        }

        if facts_equal(&previous_elements, &elements) {
            for (output, element) in previous.iter().zip(elements) {
                let mut facts = prefix.clone();
                facts.push(element);
                tuples.get_mut(*output)?.replace_facts(facts)?;
                mark_updated(*output, tuples, &mut self.dirty)?;
            }
            self.outputs.insert(tuple, previous);
            return Ok(());
        }

        for output in previous {
            kill_tuple(output, tuples, &mut self.dirty)?;
        }
        let created = self.create_outputs(&prefix, elements, tuples)?;
        self.outputs.insert(tuple, created);
        Ok(())
    }

    pub fn retract(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        for output in self.outputs.remove(&tuple).unwrap_or_default() {
            kill_tuple(output, tuples, &mut self.dirty)?;
        }
        Ok(())
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

impl fmt::Debug for FlattenLastNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenLastNode")
            .field("children", &self.children)
            .field("flattener", &self.flattener)
            .field("inputs", &self.outputs.len())
            .finish()
    }
}
