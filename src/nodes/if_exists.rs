//nodes/if_exists.rs
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use crate::index_key::IndexKey;
use crate::indexer::Indexer;
use crate::joiner::Joiners;
use crate::state::TupleState;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use slotmap::{new_key_type, SlotMap};
use std::fmt;

new_key_type! {
    pub struct CounterId;
}

/// Live match count of one left tuple. The state tracks what downstream has
/// seen of that left tuple, independently of the tuple's own state upstream.
#[derive(Debug)]
struct ExistsCounter {
    left: TupleId,
    count: usize,
    state: TupleState,
    queued: bool,
    /// Left tuple already retracted; freed once propagated.
    detached: bool,
    /// Right tuples that passed the residual filter, when there is one.
    matched: Option<HashSet<TupleId>>,
}

#[derive(Debug)]
struct LeftRecord {
    key: IndexKey,
    counter: CounterId,
}

#[derive(Debug)]
struct RightRecord {
    key: IndexKey,
    matched: Option<HashSet<CounterId>>,
}

/// Passes left tuples through while at least one (`if_exists`) or no
/// (`if_not_exists`) right tuple matches them.
///
/// Left tuples are forwarded as they are; this node never creates or
/// releases tuples of its own.
pub struct IfExistsNode {
    pub children: Vec<Downstream>,
    should_exist: bool,
    joiners: Joiners,
    left_index: Indexer<CounterId>,
    right_index: Indexer<()>,
    counters: SlotMap<CounterId, ExistsCounter>,
    left_records: HashMap<TupleId, LeftRecord>,
    right_records: HashMap<TupleId, RightRecord>,
    dirty: Vec<CounterId>,
}

impl IfExistsNode {
    pub fn new(should_exist: bool, joiners: Joiners) -> Self {
        Self {
            children: Vec::new(),
            should_exist,
            left_index: joiners.left_indexer_factory().build(),
            right_index: joiners.right_indexer_factory().build(),
            joiners,
            counters: SlotMap::with_key(),
            left_records: HashMap::default(),
            right_records: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    pub fn should_exist(&self) -> bool {
        self.should_exist
    }

    fn filtering(&self) -> bool {
        self.joiners.has_filter()
    }

    #[inline]
    fn is_allowed(&self, count: usize) -> bool {
        (count > 0) == self.should_exist
    }

    fn counter_mut(&mut self, id: CounterId) -> Result<&mut ExistsCounter> {
        self.counters
            .get_mut(id)
            .ok_or_else(|| ScorenetError::illegal_state(format!("unknown counter {:?}", id)))
    }

    fn enqueue(&mut self, id: CounterId) -> Result<()> {
        let counter = self.counter_mut(id)?;
        if counter.queued {
            return Err(ScorenetError::illegal_state(format!(
                "counter of {:?} queued twice",
                counter.left
            )));
        }
        counter.queued = true;
        self.dirty.push(id);
        Ok(())
    }

    /// The left tuple becomes visible downstream again.
    fn do_insert_counter(&mut self, id: CounterId) -> Result<()> {
        let counter = self.counter_mut(id)?;
        match counter.state {
            TupleState::Dying => counter.state = TupleState::Updating,
            TupleState::Aborting => counter.state = TupleState::Creating,
            TupleState::Dead => {
                counter.state = TupleState::Creating;
                self.enqueue(id)?;
            }
            state => {
                return Err(ScorenetError::illegal_state(format!(
                    "cannot insert counter of {:?} in state {:?}",
                    counter.left, state
                )))
            }
        }
        Ok(())
    }

    /// The left tuple must disappear downstream.
    fn do_retract_counter(&mut self, id: CounterId) -> Result<()> {
        let counter = self.counter_mut(id)?;
        match counter.state {
            TupleState::Creating => counter.state = TupleState::Aborting,
            TupleState::Updating => counter.state = TupleState::Dying,
            TupleState::Ok => {
                counter.state = TupleState::Dying;
                self.enqueue(id)?;
            }
            state => {
                return Err(ScorenetError::illegal_state(format!(
                    "cannot retract counter of {:?} in state {:?}",
                    counter.left, state
                )))
            }
        }
        Ok(())
    }

    fn increment(&mut self, id: CounterId) -> Result<()> {
        let counter = self.counter_mut(id)?;
        let was_zero = counter.count == 0;
        counter.count += 1;
        if was_zero {
            if self.should_exist {
                self.do_insert_counter(id)?;
            } else {
                self.do_retract_counter(id)?;
            }
        }
        Ok(())
    }

    fn decrement(&mut self, id: CounterId) -> Result<()> {
        let counter = self.counter_mut(id)?;
        if counter.count == 0 {
            return Err(ScorenetError::illegal_state(format!(
                "match count of {:?} would become negative",
                counter.left
            )));
        }
        counter.count -= 1;
        if counter.count == 0 {
            if self.should_exist {
                self.do_retract_counter(id)?;
            } else {
                self.do_insert_counter(id)?;
            }
        }
        Ok(())
    }

    /// Right tuples under `key` that match `left`, evaluating the residual filter.
    fn count_matches(
        &self,
        left: TupleId,
        key: &IndexKey,
        tuples: &TupleArena,
    ) -> Result<(usize, Option<HashSet<TupleId>>)> {
        if !self.filtering() {
            return Ok((self.right_index.count(key), None));
        }
        let left_tuple = tuples.get(left)?;
        let mut candidates = Vec::new();
        self.right_index.visit(key, &mut |right, _| candidates.push(right));
        let mut matched = HashSet::default();
        for right in candidates {
            if self.joiners.test(left_tuple, tuples.get(right)?) {
                matched.insert(right);
            }
        }
        Ok((matched.len(), Some(matched)))
    }

    pub fn insert_left(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.left_records.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into the left input of an exists node",
                tuple
            )));
        }
        let key = self.joiners.left_key(tuples.get(tuple)?);
        let (count, matched) = self.count_matches(tuple, &key, tuples)?;
        let id = self.counters.insert(ExistsCounter {
            left: tuple,
            count,
            state: TupleState::Dead,
            queued: false,
            detached: false,
            matched: matched.clone(),
        });
        self.left_index.put(&key, tuple, id)?;
        for right in matched.into_iter().flatten() {
            if let Some(Some(counters)) = self.right_records.get_mut(&right).map(|r| r.matched.as_mut()) {
                counters.insert(id);
            }
        }
        self.left_records.insert(tuple, LeftRecord { key, counter: id });
        if self.is_allowed(count) {
            self.counter_mut(id)?.state = TupleState::Creating;
            self.enqueue(id)?;
        }
        Ok(())
    }

    pub fn update_left(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let (old_key, id) = match self.left_records.get(&tuple) {
            Some(record) => (record.key.clone(), record.counter),
            None => return self.insert_left(tuple, tuples),
        };
        let key = self.joiners.left_key(tuples.get(tuple)?);
        if key != old_key {
            self.left_index.remove(&old_key, tuple)?;
            self.left_index.put(&key, tuple, id)?;
            if let Some(record) = self.left_records.get_mut(&tuple) {
                record.key = key.clone();
            }
        } else if !self.filtering() {
            // Same key, same partners: the count cannot have changed.
            return self.update_counter_left(id);
        }

        self.forget_matches(id)?;
        let (count, matched) = self.count_matches(tuple, &key, tuples)?;
        for right in matched.iter().flatten() {
            if let Some(Some(counters)) = self.right_records.get_mut(right).map(|r| r.matched.as_mut()) {
                counters.insert(id);
            }
        }
        let counter = self.counter_mut(id)?;
        counter.count = count;
        counter.matched = matched;
        self.update_counter_left(id)
    }

    /// Brings downstream in line with a left tuple whose count was recomputed.
    fn update_counter_left(&mut self, id: CounterId) -> Result<()> {
        let (count, state) = {
            let counter = self.counter_mut(id)?;
            (counter.count, counter.state)
        };
        if self.is_allowed(count) {
            match state {
                TupleState::Creating | TupleState::Updating => {}
                TupleState::Ok => {
                    self.counter_mut(id)?.state = TupleState::Updating;
                    self.enqueue(id)?;
                }
                TupleState::Dying => self.counter_mut(id)?.state = TupleState::Updating,
                TupleState::Aborting => self.counter_mut(id)?.state = TupleState::Creating,
                TupleState::Dead => {
                    self.counter_mut(id)?.state = TupleState::Creating;
                    self.enqueue(id)?;
                }
            }
        } else {
            match state {
                TupleState::Creating | TupleState::Updating | TupleState::Ok => {
                    self.do_retract_counter(id)?
                }
                TupleState::Dying | TupleState::Aborting | TupleState::Dead => {}
            }
        }
        Ok(())
    }

    /// Drops the filter bookkeeping between a counter and its right matches.
    fn forget_matches(&mut self, id: CounterId) -> Result<()> {
        let matched = self.counter_mut(id)?.matched.take();
        for right in matched.into_iter().flatten() {
            if let Some(Some(counters)) = self.right_records.get_mut(&right).map(|r| r.matched.as_mut()) {
                counters.remove(&id);
            }
        }
        Ok(())
    }

    pub fn retract_left(&mut self, tuple: TupleId) -> Result<()> {
        let record = match self.left_records.remove(&tuple) {
            Some(record) => record,
            None => return Ok(()),
        };
        let id = self.left_index.remove(&record.key, tuple)?;
        if id != record.counter {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} indexed with a foreign counter",
                tuple
            )));
        }
        self.forget_matches(id)?;
        let (count, state) = {
            let counter = self.counter_mut(id)?;
            (counter.count, counter.state)
        };
        if self.is_allowed(count) && state.is_active() {
            self.do_retract_counter(id)?;
        }
        let counter = self.counter_mut(id)?;
        counter.detached = true;
        if !counter.queued {
            self.counters.remove(id);
        }
        Ok(())
    }

    pub fn insert_right(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.right_records.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into the right input of an exists node",
                tuple
            )));
        }
        let key = self.joiners.right_key(tuples.get(tuple)?);
        self.right_index.put(&key, tuple, ())?;
        let candidates = self.left_index.matches(&key);

        if !self.filtering() {
            self.right_records.insert(tuple, RightRecord { key, matched: None });
            for (_, id) in candidates {
                self.increment(id)?;
            }
            return Ok(());
        }

        let mut matched = HashSet::default();
        for (left, id) in candidates {
            if self.joiners.test(tuples.get(left)?, tuples.get(tuple)?) {
                matched.insert(id);
                if let Some(Some(rights)) = self.counters.get_mut(id).map(|c| c.matched.as_mut()) {
                    rights.insert(tuple);
                }
                self.increment(id)?;
            }
        }
        self.right_records.insert(tuple, RightRecord { key, matched: Some(matched) });
        Ok(())
    }

    /// Right updates re-run the match from scratch.
    pub fn update_right(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        self.retract_right(tuple)?;
        self.insert_right(tuple, tuples)
    }

    pub fn retract_right(&mut self, tuple: TupleId) -> Result<()> {
        let record = match self.right_records.remove(&tuple) {
            Some(record) => record,
            None => return Ok(()),
        };
        self.right_index.remove(&record.key, tuple)?;
        let affected: Vec<CounterId> = match record.matched {
            Some(matched) => matched.into_iter().collect(),
            None => self.left_index.matches(&record.key).into_iter().map(|(_, id)| id).collect(),
        };
        for id in affected {
            if let Some(Some(rights)) = self.counters.get_mut(id).map(|c| c.matched.as_mut()) {
                rights.remove(&tuple);
            }
            self.decrement(id)?;
        }
        Ok(())
    }

    pub fn propagate(&mut self, operations: &mut Vec<NodeOperation>) -> Result<usize> {
        let drained = self.dirty.len();
        let mut surviving = Vec::with_capacity(drained);
        let queue: Vec<CounterId> = self.dirty.drain(..).collect();
        for &id in &queue {
            let counter = self.counter_mut(id)?;
            match counter.state {
                TupleState::Dying => {
                    counter.state = TupleState::Dead;
                    let left = counter.left;
                    NodeOperation::fan_out(&self.children, left, NodeOperation::Retract, operations);
                }
                TupleState::Aborting => counter.state = TupleState::Dead,
                TupleState::Creating | TupleState::Updating => surviving.push(id),
                state => {
                    return Err(ScorenetError::illegal_state(format!(
                        "counter of {:?} queued in state {:?}",
                        counter.left, state
                    )))
                }
            }
        }
        for id in surviving {
            let counter = self.counter_mut(id)?;
            let make = if counter.state == TupleState::Creating {
                NodeOperation::Insert
            } else {
                NodeOperation::Update
            };
            counter.state = TupleState::Ok;
            let left = counter.left;
            NodeOperation::fan_out(&self.children, left, make, operations);
        }
        for id in queue {
            let counter = self.counter_mut(id)?;
            counter.queued = false;
            if counter.detached {
                self.counters.remove(id);
            }
        }
        Ok(drained)
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Left tuples currently visible downstream.
    pub fn passing_count(&self) -> usize {
        self.counters
            .values()
            .filter(|counter| !counter.detached && counter.state == TupleState::Ok)
            .count()
    }

    /// Recounts every counter from the right index and compares.
    pub fn check_invariants(&self, tuples: &TupleArena) -> Result<()> {
        for (left, record) in &self.left_records {
            let counter = self.counters.get(record.counter).ok_or_else(|| {
                ScorenetError::illegal_state(format!("{:?} lost its counter", left))
            })?;
            let (expected, _) = self.count_matches(*left, &record.key, tuples)?;
            if counter.count != expected {
                return Err(ScorenetError::illegal_state(format!(
                    "counter of {:?} is {} but {} right tuples match",
                    left, counter.count, expected
                )));
            }
            if self.dirty.is_empty()
                && self.is_allowed(counter.count) != (counter.state == TupleState::Ok)
            {
                return Err(ScorenetError::illegal_state(format!(
                    "{:?} with {} matches is in state {:?} after propagation",
                    left, counter.count, counter.state
                )));
            }
        }
        if self.dirty.is_empty() && self.counters.len() != self.left_records.len() {
            return Err(ScorenetError::illegal_state("detached counters outlived propagation"));
        }
        Ok(())
    }
}

impl fmt::Debug for IfExistsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IfExistsNode")
            .field("children", &self.children)
            .field("should_exist", &self.should_exist)
            .field("joiners", &self.joiners)
            .field("left_tuples", &self.left_records.len())
            .field("right_tuples", &self.right_records.len())
            .finish()
    }
}
