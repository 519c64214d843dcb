//scheduler.rs
use crate::arena::{NodeArena, NodeId, NodeOperation, TupleArena, TupleId};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::score::Score;
use tracing::trace;

/// Counters of a single flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Dirty records drained from node queues
    pub propagated: usize,
    /// Insert, update and retract operations delivered to nodes
    pub operations: usize,
    /// Tuples handed back to the arena
    pub released: usize,
}

/// Drains dirty queues in topological order until the network is quiet.
///
/// Each node's queue is turned into downstream operations, and those are
/// executed depth-first before the next node is visited. Retired tuples are
/// released only once every node has settled, so no node can observe a
/// recycled id during the flush.
#[derive(Debug)]
pub struct FlushScheduler {
    order: Vec<NodeId>,
    config: NetworkConfig,
    stack: Vec<NodeOperation>,
    produced: Vec<NodeOperation>,
    pending_release: Vec<TupleId>,
}

impl FlushScheduler {
    pub fn new(order: Vec<NodeId>, config: NetworkConfig) -> Self {
        let capacity = config.initial_queue_capacity;
        Self {
            order,
            config,
            stack: Vec::with_capacity(capacity),
            produced: Vec::with_capacity(capacity),
            pending_release: Vec::with_capacity(capacity),
        }
    }

    /// Nodes in the order their queues are drained.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn flush<S: Score>(
        &mut self,
        nodes: &mut NodeArena<S>,
        tuples: &mut TupleArena,
    ) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        self.stack.clear();
        self.produced.clear();
        self.pending_release.clear();

        for position in 0..self.order.len() {
            let node_id = self.order[position];
            let node = nodes.node_mut(node_id)?;
            if node.pending() == 0 {
                continue;
            }
            let kind = node.kind();
            stats.propagated += node.propagate(tuples, &mut self.produced)?;
            trace!(%kind, operations = self.produced.len(), "propagated dirty queue");
            self.stack.extend(self.produced.drain(..).rev());
            self.execute(nodes, tuples, &mut stats)?;
        }

        for tuple in self.pending_release.drain(..) {
            tuples.release(tuple)?;
            stats.released += 1;
        }
        Ok(stats)
    }

    fn execute<S: Score>(
        &mut self,
        nodes: &mut NodeArena<S>,
        tuples: &mut TupleArena,
        stats: &mut FlushStats,
    ) -> Result<()> {
        while let Some(operation) = self.stack.pop() {
            if let NodeOperation::Release(tuple) = operation {
                self.pending_release.push(tuple);
                continue;
            }
            stats.operations += 1;
            self.config.check_operation_limit(stats.operations)?;
            nodes.apply(operation, tuples, &mut self.produced)?;
            self.stack.extend(self.produced.drain(..).rev());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Downstream, NodeData, Side};
    use crate::constraint::{ConstraintId, ImpactType};
    use crate::error::ScorenetError;
    use crate::nodes::test_support::*;
    use crate::nodes::{FilterNode, ForEachNode, ScorerNode};
    use crate::score::SimpleScore;
    use crate::stream_def::{predicate, weigher};
    use crate::tuple::AnyTuple;
    use std::any::TypeId;

    struct Chain {
        nodes: NodeArena<SimpleScore>,
        for_each: NodeId,
        scorer: NodeId,
        scheduler: FlushScheduler,
    }

    fn chain(config: NetworkConfig) -> Chain {
        let mut nodes = NodeArena::new();
        let for_each = nodes.insert_node(NodeData::ForEach(ForEachNode::new(TypeId::of::<Item>(), "Item")));
        let filter = nodes.insert_node(NodeData::Filter(FilterNode::new(predicate(|t| value_of(t) > 1))));
        let scorer = nodes.insert_node(NodeData::Scorer(ScorerNode::new(
            ConstraintId(0),
            "Large items",
            SimpleScore::new(1.0),
            ImpactType::Penalty,
            1.0,
            weigher(|t| value_of(t) as f64),
            true,
        )));
        nodes.node_mut(for_each).unwrap().add_child(Downstream::new(filter, Side::Single)).unwrap();
        nodes.node_mut(filter).unwrap().add_child(Downstream::new(scorer, Side::Single)).unwrap();
        Chain {
            nodes,
            for_each,
            scorer,
            scheduler: FlushScheduler::new(vec![for_each, filter, scorer], config),
        }
    }

    fn insert(chain: &mut Chain, tuples: &mut TupleArena, value: i64) -> TupleId {
        let tuple = tuples.acquire(AnyTuple::uni(item(value, 0, value))).unwrap();
        match chain.nodes.node_mut(chain.for_each).unwrap() {
            NodeData::ForEach(node) => node.insert(tuple, tuples).unwrap(),
            _ => unreachable!(),
        }
        tuple
    }

    fn scored(chain: &Chain) -> SimpleScore {
        match chain.nodes.get_node(chain.scorer).unwrap() {
            NodeData::Scorer(node) => node.score(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn flush_drives_tuples_to_the_scorer_and_releases_retired_ones() {
        let mut tuples = TupleArena::new();
        let mut chain = chain(NetworkConfig::default());
        insert(&mut chain, &mut tuples, 1);
        let big = insert(&mut chain, &mut tuples, 3);

        let stats = chain.scheduler.flush(&mut chain.nodes, &mut tuples).unwrap();
        assert_eq!(stats.propagated, 2);
        assert_eq!(scored(&chain), SimpleScore::new(-3.0));

        match chain.nodes.node_mut(chain.for_each).unwrap() {
            NodeData::ForEach(node) => node.retract(big, &mut tuples).unwrap(),
            _ => unreachable!(),
        }
        let stats = chain.scheduler.flush(&mut chain.nodes, &mut tuples).unwrap();
        assert_eq!(stats.released, 1);
        assert!(!tuples.contains(big));
        assert_eq!(tuples.len(), 1);
        assert_eq!(scored(&chain), SimpleScore::new(0.0));

        let quiet = chain.scheduler.flush(&mut chain.nodes, &mut tuples).unwrap();
        assert_eq!(quiet, FlushStats::default());
    }

    #[test]
    fn operation_limit_aborts_the_flush() {
        let config = NetworkConfig {
            max_operations_per_flush: 1,
            ..NetworkConfig::default()
        };
        let mut tuples = TupleArena::new();
        let mut chain = chain(config);
        insert(&mut chain, &mut tuples, 5);
        let error = chain.scheduler.flush(&mut chain.nodes, &mut tuples).unwrap_err();
        assert!(matches!(error, ScorenetError::ResourceLimit { .. }));
    }
}
