//nodes/filter.rs
use crate::arena::{Downstream, NodeOperation, TupleArena, TupleId};
use crate::error::Result;
use crate::stream_def::{Lambda, Predicate};
use std::fmt;

/// Stateless pass-through. Forwards in the same step it is called, so it
/// never has anything to propagate at flush time.
///
/// Retracts are always forwarded: the filter keeps no record of what it let
/// through, and every downstream node tolerates the retract of a tuple it
/// never saw.
pub struct FilterNode {
    pub children: Vec<Downstream>,
    predicate: Lambda<Predicate>,
}

impl FilterNode {
    pub fn new(predicate: Lambda<Predicate>) -> Self {
        Self { children: Vec::new(), predicate }
    }

    pub fn insert(
        &mut self,
        tuple: TupleId,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        if (self.predicate)(tuples.get(tuple)?) {
            NodeOperation::fan_out(&self.children, tuple, NodeOperation::Insert, operations);
        }
        Ok(())
    }

    /// Forwards an update while the predicate holds, a retract otherwise.
    pub fn update(
        &mut self,
        tuple: TupleId,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        let make = if (self.predicate)(tuples.get(tuple)?) {
            NodeOperation::Update
        } else {
            NodeOperation::Retract
        };
        NodeOperation::fan_out(&self.children, tuple, make, operations);
        Ok(())
    }

    pub fn retract(&mut self, tuple: TupleId, operations: &mut Vec<NodeOperation>) -> Result<()> {
        NodeOperation::fan_out(&self.children, tuple, NodeOperation::Retract, operations);
        Ok(())
    }
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterNode")
            .field("children", &self.children)
            .field("predicate", &self.predicate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Side;
    use crate::nodes::test_support::*;
    use crate::stream_def::predicate;
    use slotmap::SlotMap;

    #[test]
    fn predicate_decides_between_update_and_retract() {
        let mut keys: SlotMap<crate::arena::NodeId, ()> = SlotMap::new();
        let to = Downstream::new(keys.insert(()), Side::Single);
        let mut node = FilterNode::new(predicate(|t| value_of(t) > 0));
        node.children.push(to);

        let mut tuples = TupleArena::new();
        let positive = live_tuple(&mut tuples, item(1, 0, 5));
        let negative = live_tuple(&mut tuples, item(2, 0, -5));

        let mut operations = Vec::new();
        node.insert(positive, &mut tuples, &mut operations).unwrap();
        node.insert(negative, &mut tuples, &mut operations).unwrap();
        assert_eq!(operations, vec![NodeOperation::Insert(to, positive)]);

        operations.clear();
        node.update(negative, &mut tuples, &mut operations).unwrap();
        node.update(positive, &mut tuples, &mut operations).unwrap();
        node.retract(negative, &mut operations).unwrap();
        assert_eq!(
            operations,
            vec![
                NodeOperation::Retract(to, negative),
                NodeOperation::Update(to, positive),
                NodeOperation::Retract(to, negative),
            ]
        );
    }
}
