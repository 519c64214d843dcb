//nodes/group.rs
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::collectors::{BaseCollector, CollectorSupplier, ComposedCollector, Undo};
use crate::error::{Result, ScorenetError};
use crate::fact::FactKey;
use crate::state::TupleState;
use crate::stream_def::{Lambda, Projection};
use crate::tuple::{AnyTuple, FactList};
use rustc_hash::FxHashMap as HashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::fmt;

new_key_type! {
    pub struct GroupId;
}

type GroupKey = SmallVec<[FactKey; 4]>;

#[derive(Debug)]
struct Group {
    key: GroupKey,
    collector: ComposedCollector,
    member_count: usize,
    dirty: bool,
    /// Lost its last member; emits a final retract and is then discarded.
    dying: bool,
    output: Option<TupleId>,
}

#[derive(Debug)]
struct Member {
    group: GroupId,
    undo: Undo,
}

/// One output tuple per distinct key: the key facts followed by one result
/// fact per collector.
pub struct GroupNode {
    pub children: Vec<Downstream>,
    keys: SmallVec<[Lambda<Projection>; 4]>,
    collectors: SmallVec<[CollectorSupplier; 4]>,
    groups: SlotMap<GroupId, Group>,
    groups_by_key: HashMap<GroupKey, GroupId>,
    members: HashMap<TupleId, Member>,
    dirty: Vec<GroupId>,
}

impl GroupNode {
    pub fn new(
        keys: SmallVec<[Lambda<Projection>; 4]>,
        collectors: SmallVec<[CollectorSupplier; 4]>,
    ) -> Self {
        Self {
            children: Vec::new(),
            keys,
            collectors,
            groups: SlotMap::with_key(),
            groups_by_key: HashMap::default(),
            members: HashMap::default(),
            dirty: Vec::new(),
        }
    }

    fn key_of(&self, tuple: &AnyTuple) -> GroupKey {
        self.keys.iter().map(|key| FactKey::new(key(tuple))).collect()
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| ScorenetError::illegal_state(format!("unknown group {:?}", id)))
    }

    fn mark_dirty(&mut self, id: GroupId) -> Result<()> {
        let group = self.group_mut(id)?;
        if !group.dirty {
            group.dirty = true;
            self.dirty.push(id);
        }
        Ok(())
    }

    pub fn insert(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.members.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} inserted twice into a group node",
                tuple
            )));
        }
        let current = tuples.get(tuple)?;
        let key = self.key_of(current);
        let id = match self.groups_by_key.get(&key) {
            Some(id) => *id,
            None => {
                let id = self.groups.insert(Group {
                    key: key.clone(),
                    collector: ComposedCollector::from_suppliers(&self.collectors),
                    member_count: 0,
                    dirty: false,
                    dying: false,
                    output: None,
                });
                self.groups_by_key.insert(key, id);
                id
            }
        };
        let group = self.group_mut(id)?;
        let undo = group.collector.insert(current);
        group.member_count += 1;
        self.members.insert(tuple, Member { group: id, undo });
        self.mark_dirty(id)
    }

    /// Same key: the old accumulation is undone and redone in place.
    /// A new key moves the tuple to another group.
    pub fn update(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        let group_id = match self.members.get(&tuple) {
            Some(member) => member.group,
            None => return self.insert(tuple, tuples),
        };
        let current = tuples.get(tuple)?;
        let key = self.key_of(current);
        if self.group_mut(group_id)?.key != key {
            self.retract(tuple)?;
            return self.insert(tuple, tuples);
        }
        let member = self
            .members
            .get_mut(&tuple)
            .ok_or_else(|| ScorenetError::illegal_state("group member vanished during update"))?;
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| ScorenetError::illegal_state("group vanished during update"))?;
        let previous = std::mem::replace(&mut member.undo, group.collector.insert(current));
        group.collector.undo(previous)?;
        self.mark_dirty(group_id)
    }

    pub fn retract(&mut self, tuple: TupleId) -> Result<()> {
        let member = match self.members.remove(&tuple) {
            Some(member) => member,
            None => return Ok(()),
        };
        let group = self.group_mut(member.group)?;
        group.collector.undo(member.undo)?;
        group.member_count -= 1;
        if group.member_count == 0 {
            group.dying = true;
            let key = group.key.clone();
            if self.groups_by_key.get(&key) == Some(&member.group) {
                self.groups_by_key.remove(&key);
            }
        }
        self.mark_dirty(member.group)
    }

    /// Re-emits every dirty group: the previous output is retracted before the
    /// new one is inserted, and emptied groups are dropped after their retract.
    pub fn propagate(
        &mut self,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<usize> {
        let drained = self.dirty.len();
        let queue: Vec<GroupId> = self.dirty.drain(..).collect();
        for id in queue {
            let group = self
                .groups
                .get_mut(id)
                .ok_or_else(|| ScorenetError::illegal_state(format!("unknown group {:?}", id)))?;
            group.dirty = false;
            if let Some(previous) = group.output.take() {
                tuples.set_state(previous, TupleState::Dead)?;
                NodeOperation::fan_out(&self.children, previous, NodeOperation::Retract, operations);
                operations.push(NodeOperation::Release(previous));
            }
            if group.dying {
                self.groups.remove(id);
                continue;
            }
            let mut facts: FactList = group.key.iter().map(|key| key.fact().clone()).collect();
            facts.extend(group.collector.results());
            let output = tuples.acquire(AnyTuple::from_facts(facts)?)?;
            tuples.set_state(output, TupleState::Ok)?;
            group.output = Some(output);
            NodeOperation::fan_out(&self.children, output, NodeOperation::Insert, operations);
        }
        Ok(drained)
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups_by_key.len()
    }

    /// Member counts must equal the live members, and only groups with
    /// members may have an output once propagated.
    pub fn check_invariants(&self) -> Result<()> {
        let mut counted: HashMap<GroupId, usize> = HashMap::default();
        for member in self.members.values() {
            *counted.entry(member.group).or_insert(0) += 1;
        }
        for (id, group) in &self.groups {
            let live = counted.get(&id).copied().unwrap_or(0);
            if live != group.member_count {
                return Err(ScorenetError::illegal_state(format!(
                    "group {:?} records {} members but has {}",
                    group.key, group.member_count, live
                )));
            }
            if group.member_count == 0 && !group.dying {
                return Err(ScorenetError::illegal_state(format!(
                    "empty group {:?} is not dying",
                    group.key
                )));
            }
            if self.dirty.is_empty() && group.output.is_none() {
                return Err(ScorenetError::illegal_state(format!(
                    "group {:?} has no output after propagation",
                    group.key
                )));
            }
        }
        if self.dirty.is_empty() && self.groups.len() != self.groups_by_key.len() {
            return Err(ScorenetError::illegal_state("dying groups outlived propagation"));
        }
        Ok(())
    }
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("children", &self.children)
            .field("keys", &self.keys)
            .field("collectors", &self.collectors)
            .field("groups", &self.groups.len())
            .field("members", &self.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Side;
    use crate::collectors::Collectors;
    use crate::nodes::test_support::*;
    use crate::stream_def::projection;
    use smallvec::smallvec;
    use std::rc::Rc;

    fn count_by_group() -> GroupNode {
        let mut node = GroupNode::new(
            smallvec![projection(|t| Rc::new(group_of(t)))],
            smallvec![Collectors::count()],
        );
        node.children.push(Downstream::new(Default::default(), Side::Single));
        node
    }

    fn flush(node: &mut GroupNode, tuples: &mut TupleArena) -> Vec<NodeOperation> {
        let mut operations = Vec::new();
        node.propagate(tuples, &mut operations).unwrap();
        operations
    }

    fn output_count(tuples: &TupleArena, operations: &[NodeOperation]) -> Option<usize> {
        operations.iter().rev().find_map(|op| match op {
            NodeOperation::Insert(_, tuple) => tuples.get(*tuple).ok()?.get::<usize>(1).copied(),
            _ => None,
        })
    }

    #[test]
    fn second_member_replaces_output() {
        let mut tuples = TupleArena::new();
        let mut node = count_by_group();
        let first = live_tuple(&mut tuples, item(1, 7, 0));
        let second = live_tuple(&mut tuples, item(2, 7, 0));

        node.insert(first, &mut tuples).unwrap();
        let operations = flush(&mut node, &mut tuples);
        assert_eq!(output_count(&tuples, &operations), Some(1));

        node.insert(second, &mut tuples).unwrap();
        let operations = flush(&mut node, &mut tuples);
        assert_eq!(retracts(&operations), 1);
        assert_eq!(inserts(&operations), 1);
        assert!(matches!(operations[0], NodeOperation::Retract(..)));
        assert_eq!(output_count(&tuples, &operations), Some(2));
        node.check_invariants().unwrap();
    }

    #[test]
    fn last_member_retracts_group_entirely() {
        let mut tuples = TupleArena::new();
        let mut node = count_by_group();
        let member = live_tuple(&mut tuples, item(1, 7, 0));
        node.insert(member, &mut tuples).unwrap();
        flush(&mut node, &mut tuples);

        node.retract(member).unwrap();
        node.retract(member).unwrap();
        let operations = flush(&mut node, &mut tuples);
        assert_eq!(retracts(&operations), 1);
        assert_eq!(inserts(&operations), 0);
        assert_eq!(node.group_count(), 0);
        node.check_invariants().unwrap();
    }

    #[test]
    fn group_emptied_and_refilled_in_one_step() {
        let mut tuples = TupleArena::new();
        let mut node = count_by_group();
        let first = live_tuple(&mut tuples, item(1, 7, 0));
        let second = live_tuple(&mut tuples, item(2, 7, 0));
        node.insert(first, &mut tuples).unwrap();
        flush(&mut node, &mut tuples);

        node.retract(first).unwrap();
        node.insert(second, &mut tuples).unwrap();
        let operations = flush(&mut node, &mut tuples);
        assert_eq!(retracts(&operations), 1);
        assert_eq!(inserts(&operations), 1);
        assert_eq!(output_count(&tuples, &operations), Some(1));
        node.check_invariants().unwrap();
    }

    #[test]
    fn update_moves_member_between_groups() {
        let mut tuples = TupleArena::new();
        let mut node = GroupNode::new(
            smallvec![projection(|t| Rc::new(value_of(t)))],
            smallvec![Collectors::count()],
        );
        let member = live_tuple(&mut tuples, item(1, 0, 3));
        let other = live_tuple(&mut tuples, item(2, 0, 3));
        node.insert(member, &mut tuples).unwrap();
        node.insert(other, &mut tuples).unwrap();
        flush(&mut node, &mut tuples);

        // Same key: recomputed in place.
        node.update(member, &mut tuples).unwrap();
        assert_eq!(node.pending(), 1);
        flush(&mut node, &mut tuples);
        assert_eq!(node.group_count(), 1);
        node.check_invariants().unwrap();
    }

    #[test]
    fn zero_keys_give_one_global_group() {
        let mut tuples = TupleArena::new();
        let mut node = GroupNode::new(
            SmallVec::new(),
            smallvec![Collectors::sum(|t| value_of(t) as f64)],
        );
        node.children.push(Downstream::new(Default::default(), Side::Single));
        for (id, value) in [(1, 2), (2, 3)] {
            let tuple = live_tuple(&mut tuples, item(id, id, value));
            node.insert(tuple, &mut tuples).unwrap();
        }
        let operations = flush(&mut node, &mut tuples);
        assert_eq!(node.group_count(), 1);
        let output = operations
            .iter()
            .find_map(|op| match op {
                NodeOperation::Insert(_, tuple) => Some(*tuple),
                _ => None,
            })
            .unwrap();
        assert_eq!(tuples.get(output).unwrap().get::<f64>(0), Some(&5.0));
    }
}
