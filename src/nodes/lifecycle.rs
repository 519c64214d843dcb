//nodes/lifecycle.rs
//! State transitions shared by every node that owns the tuples it emits.

use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::{Result, ScorenetError};
use crate::fact::Fact;
use crate::state::TupleState;
use std::rc::Rc;

/// Moves an emitted tuple towards retraction.
///
/// | state    | becomes  | queued |
/// |----------|----------|--------|
/// | Creating | Aborting | already |
/// | Updating | Dying    | already |
/// | Ok       | Dying    | now    |
pub(crate) fn kill_tuple(
    tuple: TupleId,
    tuples: &mut TupleArena,
    dirty: &mut Vec<TupleId>,
) -> Result<()> {
    match tuples.state(tuple)? {
        TupleState::Creating => tuples.set_state(tuple, TupleState::Aborting),
        TupleState::Updating => tuples.set_state(tuple, TupleState::Dying),
        TupleState::Ok => {
            tuples.set_state(tuple, TupleState::Dying)?;
            dirty.push(tuple);
            Ok(())
        }
        state => Err(ScorenetError::illegal_state(format!(
            "cannot retract {:?} in state {:?}",
            tuple, state
        ))),
    }
}

/// Schedules an update of an emitted tuple. Pending inserts and updates
/// already carry the latest facts downstream.
pub(crate) fn mark_updated(
    tuple: TupleId,
    tuples: &mut TupleArena,
    dirty: &mut Vec<TupleId>,
) -> Result<()> {
    match tuples.state(tuple)? {
        TupleState::Creating | TupleState::Updating => Ok(()),
        TupleState::Ok => {
            tuples.set_state(tuple, TupleState::Updating)?;
            dirty.push(tuple);
            Ok(())
        }
        state => Err(ScorenetError::illegal_state(format!(
            "cannot update {:?} in state {:?}",
            tuple, state
        ))),
    }
}

/// Drains a dirty queue of owned tuples into downstream operations.
///
/// Retractions are emitted before inserts and updates. Dead tuples are
/// handed to the scheduler for release at the end of the flush.
pub(crate) fn propagate_dirty_tuples(
    dirty: &mut Vec<TupleId>,
    children: &[Downstream],
    tuples: &mut TupleArena,
    operations: &mut Vec<NodeOperation>,
) -> Result<usize> {
    let drained = dirty.len();
    let mut surviving = Vec::with_capacity(drained);
    for tuple in dirty.drain(..) {
        match tuples.state(tuple)? {
            TupleState::Dying => {
                tuples.set_state(tuple, TupleState::Dead)?;
                NodeOperation::fan_out(children, tuple, NodeOperation::Retract, operations);
                operations.push(NodeOperation::Release(tuple));
            }
            TupleState::Aborting => {
                tuples.set_state(tuple, TupleState::Dead)?;
                operations.push(NodeOperation::Release(tuple));
            }
            TupleState::Creating | TupleState::Updating => surviving.push(tuple),
            state => {
                return Err(ScorenetError::illegal_state(format!(
                    "{:?} queued for propagation in state {:?}",
                    tuple, state
                )))
            }
        }
    }
    for tuple in surviving {
        let make = if tuples.state(tuple)? == TupleState::Creating {
            NodeOperation::Insert
        } else {
            NodeOperation::Update
        };
        tuples.set_state(tuple, TupleState::Ok)?;
        NodeOperation::fan_out(children, tuple, make, operations);
    }
    Ok(drained)
}

/// Whether recomputed facts can replace the previous ones without telling
/// downstream. A fact that is the very same object as before may have
/// changed in place, so only equal but distinct values count as unchanged.
pub(crate) fn unchanged(previous: &[Rc<dyn Fact>], current: &[Rc<dyn Fact>]) -> bool {
    previous.len() == current.len()
        && previous
            .iter()
            .zip(current)
            .all(|(old, new)| !Rc::ptr_eq(old, new) && old.eq_fact(new.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Side;
    use crate::tuple::AnyTuple;
    use slotmap::SlotMap;

    fn child() -> Downstream {
        let mut keys: SlotMap<crate::arena::NodeId, ()> = SlotMap::new();
        Downstream::new(keys.insert(()), Side::Single)
    }

    #[test]
    fn creating_then_killed_never_propagates() {
        let mut tuples = TupleArena::new();
        let mut dirty = Vec::new();
        let tuple = tuples.acquire(AnyTuple::uni(Rc::new(1i64))).unwrap();
        dirty.push(tuple);
        kill_tuple(tuple, &mut tuples, &mut dirty).unwrap();
        assert_eq!(dirty.len(), 1);

        let mut operations = Vec::new();
        propagate_dirty_tuples(&mut dirty, &[child()], &mut tuples, &mut operations).unwrap();
        assert_eq!(operations, vec![NodeOperation::Release(tuple)]);
        assert_eq!(tuples.state(tuple).unwrap(), TupleState::Dead);
    }

    #[test]
    fn retractions_come_before_inserts() {
        let mut tuples = TupleArena::new();
        let mut dirty = Vec::new();
        let fresh = tuples.acquire(AnyTuple::uni(Rc::new(1i64))).unwrap();
        dirty.push(fresh);
        let old = tuples.acquire(AnyTuple::uni(Rc::new(2i64))).unwrap();
        tuples.set_state(old, TupleState::Ok).unwrap();
        kill_tuple(old, &mut tuples, &mut dirty).unwrap();

        let to = child();
        let mut operations = Vec::new();
        let drained = propagate_dirty_tuples(&mut dirty, &[to], &mut tuples, &mut operations).unwrap();
        assert_eq!(drained, 2);
        assert_eq!(
            operations,
            vec![
                NodeOperation::Retract(to, old),
                NodeOperation::Release(old),
                NodeOperation::Insert(to, fresh),
            ]
        );
        assert!(dirty.is_empty());
    }

    #[test]
    fn update_of_ok_tuple_is_queued_once() {
        let mut tuples = TupleArena::new();
        let mut dirty = Vec::new();
        let tuple = tuples.acquire(AnyTuple::uni(Rc::new(1i64))).unwrap();
        tuples.set_state(tuple, TupleState::Ok).unwrap();
        mark_updated(tuple, &mut tuples, &mut dirty).unwrap();
        mark_updated(tuple, &mut tuples, &mut dirty).unwrap();
        assert_eq!(dirty, vec![tuple]);

        kill_tuple(tuple, &mut tuples, &mut dirty).unwrap();
        assert_eq!(tuples.state(tuple).unwrap(), TupleState::Dying);
        assert!(kill_tuple(tuple, &mut tuples, &mut dirty).is_err());
        assert!(mark_updated(tuple, &mut tuples, &mut dirty).is_err());
    }

    #[test]
    fn distinct_equal_values_are_unchanged() {
        let shared: Rc<dyn Fact> = Rc::new(5i64);
        assert!(unchanged(&[Rc::new(5i64)], &[Rc::new(5i64)]));
        assert!(!unchanged(&[shared.clone()], &[shared]));
        assert!(!unchanged(&[Rc::new(5i64)], &[Rc::new(6i64)]));
    }
}
