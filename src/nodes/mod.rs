//nodes/mod.rs
mod filter;
mod flatten_last;
mod for_each;
mod group;
mod if_exists;
mod join;
mod lifecycle;
mod map;
mod scorer;

pub use filter::FilterNode;
pub use flatten_last::FlattenLastNode;
pub use for_each::ForEachNode;
pub use group::{GroupId, GroupNode};
pub use if_exists::{CounterId, IfExistsNode};
pub use join::JoinNode;
pub use map::MapNode;
pub use scorer::ScorerNode;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::arena::{NodeOperation, TupleArena, TupleId};
    use crate::fact::Fact;
    use crate::state::TupleState;
    use crate::tuple::AnyTuple;
    use std::any::Any;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Item {
        pub id: i64,
        pub group: i64,
        pub value: i64,
    }

    impl Fact for Item {
        fn fact_id(&self) -> i64 {
            self.id
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub fn item(id: i64, group: i64, value: i64) -> Rc<dyn Fact> {
        Rc::new(Item { id, group, value })
    }

    pub fn group_of(tuple: &AnyTuple) -> i64 {
        tuple.get::<Item>(0).map_or(-1, |item| item.group)
    }

    pub fn value_of(tuple: &AnyTuple) -> i64 {
        tuple.get::<Item>(0).map_or(0, |item| item.value)
    }

    /// Acquires a tuple the way an upstream node would after propagating it.
    pub fn live_tuple(tuples: &mut TupleArena, fact: Rc<dyn Fact>) -> TupleId {
        let id = tuples.acquire(AnyTuple::uni(fact)).unwrap();
        tuples.set_state(id, TupleState::Ok).unwrap();
        id
    }

    pub fn inserts(operations: &[NodeOperation]) -> usize {
        operations
            .iter()
            .filter(|op| matches!(op, NodeOperation::Insert(..)))
            .count()
    }

    pub fn updates(operations: &[NodeOperation]) -> usize {
        operations
            .iter()
            .filter(|op| matches!(op, NodeOperation::Update(..)))
            .count()
    }

    pub fn retracts(operations: &[NodeOperation]) -> usize {
        operations
            .iter()
            .filter(|op| matches!(op, NodeOperation::Retract(..)))
            .count()
    }

    pub fn releases(operations: &[NodeOperation]) -> usize {
        operations
            .iter()
            .filter(|op| matches!(op, NodeOperation::Release(_)))
            .count()
    }
}
