//nodes/join.rs
use super::lifecycle::{kill_tuple, mark_updated, propagate_dirty_tuples};
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use crate::index_key::IndexKey;
use crate::indexer::Indexer;
use crate::joiner::Joiners;
use crate::tuple::AnyTuple;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

/// What the node remembers about one input tuple: the key it was indexed
/// under and the outputs it takes part in, by partner.
#[derive(Debug, Default)]
struct InputRecord {
    key: IndexKey,
    outputs: HashMap<TupleId, TupleId>,
}

/// Incremental join of two streams on the index terms of its `Joiners`,
/// plus the optional residual filter.
pub struct JoinNode {
    pub children: Vec<Downstream>,
    joiners: Joiners,
    left_index: Indexer<()>,
    right_index: Indexer<()>,
    left_records: HashMap<TupleId, InputRecord>,
    right_records: HashMap<TupleId, InputRecord>,
    dirty: Vec<TupleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Left,
    Right,
}

impl JoinNode {
    pub fn new(joiners: Joiners) -> Self {
        Self {
            children: Vec::new(),
            left_index: joiners.left_indexer_factory().build(),
            right_index: joiners.right_indexer_factory().build(),
            joiners,
            left_records: HashMap::default(),
            right_records: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    pub fn insert_left(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.insert(Input::Left, tuple, tuples)
    }

    pub fn insert_right(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.insert(Input::Right, tuple, tuples)
    }

    pub fn update_left(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.update(Input::Left, tuple, tuples)
    }

    pub fn update_right(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.update(Input::Right, tuple, tuples)
    }

    pub fn retract_left(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.retract(Input::Left, tuple, tuples)
    }

    pub fn retract_right(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.retract(Input::Right, tuple, tuples)
    }

    fn key_of(&self, input: Input, tuple: &AnyTuple) -> IndexKey {
        match input {
            Input::Left => self.joiners.left_key(tuple),
            Input::Right => self.joiners.right_key(tuple),
        }
    }

    fn records_mut(&mut self, input: Input) -> &mut HashMap<TupleId, InputRecord> {
        match input {
            Input::Left => &mut self.left_records,
            Input::Right => &mut self.right_records,
        }
    }

    /// Partners of a tuple on the other input that match `key` on the index terms.
    fn candidates(&self, input: Input, key: &IndexKey) -> Vec<TupleId> {
        let mut found = Vec::new();
        let other_index = match input {
            Input::Left => &self.right_index,
            Input::Right => &self.left_index,
        };
        other_index.visit(key, &mut |partner, _| found.push(partner));
        found
    }

    fn test(&self, input: Input, tuple: &AnyTuple, partner: &AnyTuple) -> bool {
        match input {
            Input::Left => self.joiners.test(tuple, partner),
            Input::Right => self.joiners.test(partner, tuple),
        }
    }

    fn insert(&mut self, input: Input, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.records_mut(input).contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into the {:?} input of a join",
                tuple, input
            )));
        }
        let current = tuples.get(tuple)?.clone();
        let key = self.key_of(input, &current);
        match input {
            Input::Left => self.left_index.put(&key, tuple, ())?,
            Input::Right => self.right_index.put(&key, tuple, ())?,
        }
        let partners = self.candidates(input, &key);
        self.records_mut(input).insert(tuple, InputRecord { key, outputs: HashMap::default() });
        for partner in partners {
            self.create_output_if_matching(input, tuple, &current, partner, tuples)?;
        }
        Ok(())
    }

    fn create_output_if_matching(
        &mut self,
        input: Input,
        tuple: TupleId,
        current: &AnyTuple,
        partner: TupleId,
        tuples: &mut TupleArena,
    ) -> Result<()> {
        let partner_tuple = tuples.get(partner)?.clone();
        if !self.test(input, current, &partner_tuple) {
            return Ok(());
        }
        let combined = self.combine(input, current, &partner_tuple)?;
        let (left, right) = match input {
            Input::Left => (tuple, partner),
            Input::Right => (partner, tuple),
        };
        let output = tuples.acquire(combined)?;
        self.link(left, right, output)?;
        self.dirty.push(output);
        Ok(())
    }

    /// Output facts in left-then-right order.
    fn combine(&self, input: Input, tuple: &AnyTuple, partner: &AnyTuple) -> Result<AnyTuple> {
        match input {
            Input::Left => tuple.combine(partner),
            Input::Right => partner.combine(tuple),
        }
    }

    fn link(&mut self, left: TupleId, right: TupleId, output: TupleId) -> Result<()> {
        let missing = || ScorenetError::illegal_state("join output linked to an unknown input");
        self.left_records
            .get_mut(&left)
            .ok_or_else(missing)?
            .outputs
            .insert(right, output);
        self.right_records
            .get_mut(&right)
            .ok_or_else(missing)?
            .outputs
            .insert(left, output);
        Ok(())
    }

    fn unlink_from_partner(&mut self, input: Input, tuple: TupleId, partner: TupleId) {
        let partner_records = match input {
            Input::Left => &mut self.right_records,
            Input::Right => &mut self.left_records,
        };
        if let Some(record) = partner_records.get_mut(&partner) {
            record.outputs.remove(&tuple);
        }
    }

    fn update(&mut self, input: Input, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let old_key = match self.records_mut(input).get(&tuple) {
            Some(record) => record.key.clone(),
            // Dropped by an upstream filter until now.
            None => return self.insert(input, tuple, tuples),
        };
        let current = tuples.get(tuple)?.clone();
        let new_key = self.key_of(input, &current);
        if new_key != old_key {
            self.retract(input, tuple, tuples)?;
            return self.insert(input, tuple, tuples);
        }

        // Same key, so the same candidates; the residual filter may now decide differently.
        for partner in self.candidates(input, &new_key) {
            let existing = self
                .records_mut(input)
                .get(&tuple)
                .and_then(|record| record.outputs.get(&partner).copied());
            let partner_tuple = tuples.get(partner)?.clone();
            let matching = self.test(input, &current, &partner_tuple);
            match (existing, matching) {
                (Some(output), true) => {
                    // Upstream map and flatten steps replace their facts, so the copy is refreshed.
                    let combined = self.combine(input, &current, &partner_tuple)?;
                    tuples.get_mut(output)?.replace_facts(combined.facts())?;
                    mark_updated(output, tuples, &mut self.dirty)?
                }
                (Some(output), false) => {
                    if let Some(record) = self.records_mut(input).get_mut(&tuple) {
                        record.outputs.remove(&partner);
                    }
                    self.unlink_from_partner(input, tuple, partner);
                    kill_tuple(output, tuples, &mut self.dirty)?;
                }
                (None, true) => {
                    self.create_output_if_matching(input, tuple, &current, partner, tuples)?
                }
                (None, false) => {}
            }
        }
        Ok(())
    }

    fn retract(&mut self, input: Input, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let record = match self.records_mut(input).remove(&tuple) {
            Some(record) => record,
            None => return Ok(()),
        };
        match input {
            Input::Left => self.left_index.remove(&record.key, tuple)?,
            Input::Right => self.right_index.remove(&record.key, tuple)?,
        }
        for (partner, output) in record.outputs {
            self.unlink_from_partner(input, tuple, partner);
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

    /// Number of live output tuples.
    pub fn output_count(&self) -> usize {
        self.left_records.values().map(|record| record.outputs.len()).sum()
    }

    /// Cross-checks both output registries and both indexes.
    pub fn check_invariants(&self) -> Result<()> {
        for (left, record) in &self.left_records {
            for (right, output) in &record.outputs {
                let mirrored = self
                    .right_records
                    .get(right)
                    .and_then(|partner| partner.outputs.get(left));
                if mirrored != Some(output) {
                    return Err(ScorenetError::illegal_state(format!(
                        "join output {:?} of ({:?}, {:?}) is not registered on the right",
                        output, left, right
                    )));
                }
            }
        }
        let right_outputs: usize = self.right_records.values().map(|r| r.outputs.len()).sum();
        if right_outputs != self.output_count() {
            return Err(ScorenetError::illegal_state(format!(
                "join has {} left-side outputs but {} right-side outputs",
                self.output_count(),
                right_outputs
            )));
        }
        if self.left_index.len() != self.left_records.len()
            || self.right_index.len() != self.right_records.len()
        {
            return Err(ScorenetError::illegal_state("join index and records disagree"));
        }
        Ok(())
    }
}

impl fmt::Debug for JoinNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinNode")
            .field("children", &self.children)
            .field("joiners", &self.joiners)
            .field("left_tuples", &self.left_records.len())
            .field("right_tuples", &self.right_records.len())
            .field("outputs", &self.output_count())
            .finish()
    }
}
