//session.rs
use crate::analysis::{ConstraintMatch, ConstraintMatchTotal, NetworkStatistics};
use crate::arena::{NodeArena, NodeData, NodeId, TupleArena, TupleId};
use crate::constraint::ConstraintWeights;
use crate::error::{Result, ScorenetError};
use crate::fact::Fact;
use crate::nodes::{ForEachNode, ScorerNode};
use crate::scheduler::{FlushScheduler, FlushStats};
use crate::score::Score;
use crate::tuple::AnyTuple;
use rustc_hash::FxHashMap as HashMap;
use std::any::{Any, TypeId};
use std::rc::Rc;
use tracing::{debug, trace};

/// A built network plus the facts fed into it.
///
/// Changes are queued by `insert`, `update` and `retract` and only reach the
/// scorers when the session is flushed. A single thread drives a session.
#[derive(Debug)]
pub struct Session<S: Score> {
    nodes: NodeArena<S>,
    tuples: TupleArena,
    scheduler: FlushScheduler,
    for_each_nodes: HashMap<TypeId, NodeId>,
    scorers: Vec<NodeId>,
    weights: ConstraintWeights,
    layers: HashMap<NodeId, usize>,
    shared_nodes: usize,
    /// Score change settled into the scorers but not yet returned by `flush`
    delta: S,
    last_flush: FlushStats,
}

fn for_each_node<S: Score>(nodes: &mut NodeArena<S>, node_id: NodeId) -> Result<&mut ForEachNode> {
    match nodes.node_mut(node_id)? {
        NodeData::ForEach(node) => Ok(node),
        other => Err(ScorenetError::illegal_state(format!(
            "{} node registered as a fact source",
            other.kind()
        ))),
    }
}

impl<S: Score> Session<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        nodes: NodeArena<S>,
        tuples: TupleArena,
        scheduler: FlushScheduler,
        for_each_nodes: HashMap<TypeId, NodeId>,
        scorers: Vec<NodeId>,
        weights: ConstraintWeights,
        layers: HashMap<NodeId, usize>,
        shared_nodes: usize,
    ) -> Self {
        Self {
            nodes,
            tuples,
            scheduler,
            for_each_nodes,
            scorers,
            weights,
            layers,
            shared_nodes,
            delta: S::null_score(),
            last_flush: FlushStats::default(),
        }
    }

    pub fn insert<T: Fact>(&mut self, fact: Rc<T>) -> Result<()> {
        self.insert_fact(fact)
    }

    /// Inserts a fact whose concrete type is only known at runtime.
    /// Facts of a type no constraint consumes are ignored.
    pub fn insert_fact(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        let fact_type = Any::type_id(fact.as_any());
        let node_id = match self.for_each_nodes.get(&fact_type) {
            Some(node_id) => *node_id,
            None => {
                trace!(fact_id = fact.fact_id(), "ignoring fact of an unused type");
                return Ok(());
            }
        };
        let node = for_each_node(&mut self.nodes, node_id)?;
        let fact_id = fact.fact_id();
        if node.tuple_of(fact_id).is_some() {
            return Err(ScorenetError::duplicate_fact(node.type_name(), fact_id));
        }
        let tuple = self.tuples.acquire(AnyTuple::uni(fact))?;
        node.insert(tuple, &mut self.tuples)
    }

    pub fn insert_batch<T: Fact>(&mut self, facts: impl IntoIterator<Item = Rc<T>>) -> Result<()> {
        for fact in facts {
            self.insert(fact)?;
        }
        Ok(())
    }

    /// Announces that a fact already in the session changed in place.
    pub fn update<T: Fact>(&mut self, fact: &T) -> Result<()> {
        match self.known_tuple(TypeId::of::<T>(), fact.fact_id())? {
            Some((node_id, tuple)) => for_each_node(&mut self.nodes, node_id)?.update(tuple, &mut self.tuples),
            None => Ok(()),
        }
    }

    pub fn retract<T: Fact>(&mut self, fact: &T) -> Result<()> {
        self.retract_id::<T>(fact.fact_id())
    }

    /// Retracts the fact of type `T` with the given id.
    pub fn retract_id<T: Fact>(&mut self, fact_id: i64) -> Result<()> {
        match self.known_tuple(TypeId::of::<T>(), fact_id)? {
            Some((node_id, tuple)) => for_each_node(&mut self.nodes, node_id)?.retract(tuple, &mut self.tuples),
            None => Ok(()),
        }
    }

    pub fn retract_batch<'a, T: Fact>(&mut self, facts: impl IntoIterator<Item = &'a T>) -> Result<()> {
        for fact in facts {
            self.retract(fact)?;
        }
        Ok(())
    }

    /// Tuple of a fact of a consumed type, or `None` if no constraint uses
    /// the type. A consumed type with an unknown id is an error.
    fn known_tuple(&mut self, fact_type: TypeId, fact_id: i64) -> Result<Option<(NodeId, TupleId)>> {
        let node_id = match self.for_each_nodes.get(&fact_type) {
            Some(node_id) => *node_id,
            None => {
                trace!(fact_id, "ignoring fact of an unused type");
                return Ok(None);
            }
        };
        let node = for_each_node(&mut self.nodes, node_id)?;
        match node.tuple_of(fact_id) {
            Some(tuple) => Ok(Some((node_id, tuple))),
            None => Err(ScorenetError::fact_not_found(node.type_name(), fact_id)),
        }
    }

    /// Retracts every fact and settles the network.
    pub fn clear(&mut self) -> Result<()> {
        for node_id in self.for_each_nodes.values().copied().collect::<Vec<_>>() {
            let node = for_each_node(&mut self.nodes, node_id)?;
            let known: Vec<TupleId> = node.tuple_ids().collect();
            for tuple in known {
                node.retract(tuple, &mut self.tuples)?;
            }
        }
        self.settle()
    }

    fn settle(&mut self) -> Result<()> {
        let stats = self.scheduler.flush(&mut self.nodes, &mut self.tuples)?;
        for &node_id in &self.scorers {
            if let Some(NodeData::Scorer(scorer)) = self.nodes.get_node_mut(node_id) {
                self.delta = self.delta.clone() + scorer.take_delta();
            }
        }
        trace!(
            propagated = stats.propagated,
            operations = stats.operations,
            released = stats.released,
            live_tuples = self.tuples.len(),
            "flushed"
        );
        self.last_flush = stats;
        Ok(())
    }

    /// Propagates every queued change and returns the score change since
    /// the previous flush.
    pub fn flush(&mut self) -> Result<S> {
        self.settle()?;
        Ok(std::mem::replace(&mut self.delta, S::null_score()))
    }

    /// Propagates every queued change and returns the total score.
    pub fn calculate_score(&mut self) -> Result<S> {
        self.settle()?;
        Ok(self.score())
    }

    /// Total score as of the last flush.
    pub fn score(&self) -> S {
        self.scorer_nodes()
            .fold(S::null_score(), |total, scorer| total + scorer.score())
    }

    pub fn last_flush(&self) -> FlushStats {
        self.last_flush
    }

    fn scorer_nodes(&self) -> impl Iterator<Item = &ScorerNode<S>> {
        self.scorers
            .iter()
            .filter_map(move |node_id| match self.nodes.get_node(*node_id) {
                Some(NodeData::Scorer(scorer)) => Some(scorer),
                _ => None,
            })
    }

    pub fn constraint_weights(&self) -> &ConstraintWeights {
        &self.weights
    }

    /// Changes the multiplier applied to a constraint's base weight. Every
    /// live match is rescored; the change shows up in the next flush.
    pub fn update_constraint_weight(&mut self, constraint_name: &str, multiplier: f64) -> Result<()> {
        if !multiplier.is_finite() {
            return Err(ScorenetError::config(format!(
                "weight of constraint '{}' is not finite: {}",
                constraint_name, multiplier
            )));
        }
        let mut found = false;
        for &node_id in &self.scorers {
            if let Some(NodeData::Scorer(scorer)) = self.nodes.get_node_mut(node_id) {
                if scorer.constraint_name() == constraint_name {
                    scorer.set_multiplier(multiplier);
                    found = true;
                }
            }
        }
        if !found {
            return Err(ScorenetError::config(format!(
                "unknown constraint '{}'",
                constraint_name
            )));
        }
        self.weights.set_weight(constraint_name, multiplier);
        debug!(constraint = constraint_name, multiplier, "updated constraint weight");
        Ok(())
    }

    /// Every live match with its justifying facts, after settling the network.
    pub fn constraint_matches(&mut self) -> Result<Vec<ConstraintMatch<S>>> {
        self.settle()?;
        let mut matches = Vec::new();
        for scorer in self.scorer_nodes() {
            for (tuple, score) in scorer.matches() {
                matches.push(ConstraintMatch {
                    constraint_name: scorer.constraint_name().to_string(),
                    facts: self.tuples.get(tuple)?.facts().into_vec(),
                    score: score.clone(),
                });
            }
        }
        Ok(matches)
    }

    /// Per-constraint match counts and scores, in definition order.
    pub fn constraint_match_totals(&mut self) -> Result<Vec<ConstraintMatchTotal<S>>> {
        self.settle()?;
        Ok(self
            .scorer_nodes()
            .map(|scorer| ConstraintMatchTotal {
                constraint_name: scorer.constraint_name().to_string(),
                match_count: scorer.match_count(),
                score: scorer.score(),
            })
            .collect())
    }

    /// Records still waiting in dirty queues.
    pub fn pending(&self) -> usize {
        self.nodes.iter().map(|(_, node)| node.pending()).sum()
    }

    pub fn statistics(&self) -> NetworkStatistics {
        let mut node_counts = HashMap::default();
        for (_, node) in self.nodes.iter() {
            *node_counts.entry(node.kind()).or_insert(0) += 1;
        }
        NetworkStatistics {
            total_nodes: self.nodes.len(),
            node_counts,
            constraints: self.scorers.len(),
            shared_nodes: self.shared_nodes,
            layers: self.layers.values().max().map_or(0, |layer| layer + 1),
            pending: self.pending(),
            matches: self.scorer_nodes().map(ScorerNode::match_count).sum(),
            arena: self.tuples.stats(),
        }
    }

    /// Recomputes every node's bookkeeping from scratch and compares it with
    /// the incrementally maintained state.
    pub fn check_invariants(&self) -> Result<()> {
        for (_, node) in self.nodes.iter() {
            node.check_invariants(&self.tuples)?;
        }
        for (_, node) in self.nodes.iter() {
            if let NodeData::ForEach(for_each) = node {
                if let Some(missing) = for_each.tuple_ids().find(|tuple| !self.tuples.contains(*tuple)) {
                    return Err(ScorenetError::invalid_tuple(format!(
                        "{} fact tuple {:?} is gone from the arena",
                        for_each.type_name(),
                        missing
                    )));
                }
            }
        }
        if self.pending() == 0 {
            let dirty = self.tuples.stats().dirty_tuples;
            if dirty > 0 {
                return Err(ScorenetError::illegal_state(format!(
                    "{} tuples are dirty in a settled network",
                    dirty
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NetworkBuilder;
    use crate::config::NetworkConfig;
    use crate::nodes::test_support::Item;
    use crate::score::SimpleScore;
    use crate::stream_def::Stream;

    fn item(id: i64, value: i64) -> Rc<Item> {
        Rc::new(Item { id, group: 0, value })
    }

    fn session() -> Session<SimpleScore> {
        let config = NetworkConfig::default().with_constraint_weight("Values", 2.0);
        NetworkBuilder::with_config(config)
            .unwrap()
            .constraint(
                Stream::for_each::<Item>()
                    .penalize_weighted("Values", SimpleScore::new(1.0), |t| {
                        t.get::<Item>(0).map_or(0.0, |item| item.value as f64)
                    }),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn flush_reports_deltas_and_totals() {
        let mut session = session();
        session.insert(item(1, 3)).unwrap();
        session.insert(item(2, 4)).unwrap();
        assert_eq!(session.flush().unwrap(), SimpleScore::new(-14.0));
        assert_eq!(session.flush().unwrap(), SimpleScore::new(0.0));

        session.retract_id::<Item>(1).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(-8.0));
        assert_eq!(session.flush().unwrap(), SimpleScore::new(6.0));
        session.check_invariants().unwrap();
    }

    #[test]
    fn duplicate_and_unknown_facts_are_rejected() {
        let mut session = session();
        session.insert(item(1, 3)).unwrap();
        assert!(matches!(
            session.insert(item(1, 5)),
            Err(ScorenetError::DuplicateFact { fact_id: 1, .. })
        ));
        assert!(matches!(
            session.retract(item(9, 0).as_ref()),
            Err(ScorenetError::FactNotFound { fact_id: 9, .. })
        ));
        // No constraint consumes strings.
        session.insert(Rc::new(String::from("ignored"))).unwrap();
        assert_eq!(session.statistics().arena.live_tuples, 1);
    }

    #[test]
    fn weight_changes_rescore_live_matches() {
        let mut session = session();
        session.insert(item(1, 3)).unwrap();
        session.flush().unwrap();

        session.update_constraint_weight("Values", 1.0).unwrap();
        assert_eq!(session.flush().unwrap(), SimpleScore::new(3.0));
        assert_eq!(session.score(), SimpleScore::new(-3.0));
        assert!(session.update_constraint_weight("Missing", 1.0).is_err());
        assert!(session.update_constraint_weight("Values", f64::NAN).is_err());
    }

    #[test]
    fn explain_lists_matches_and_totals() {
        let mut session = session();
        session.insert(item(1, 3)).unwrap();
        session.insert(item(2, 0)).unwrap();
        let matches = session.constraint_matches().unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.constraint_name == "Values"));

        let totals = session.constraint_match_totals().unwrap();
        assert_eq!(totals[0].match_count, 2);
        assert_eq!(totals[0].score, SimpleScore::new(-6.0));
        // Settling for the explain does not swallow the delta.
        assert_eq!(session.flush().unwrap(), SimpleScore::new(-6.0));
    }

    #[test]
    fn clear_empties_the_network() {
        let mut session = session();
        session.insert_batch((1..=5).map(|id| item(id, id))).unwrap();
        session.flush().unwrap();
        session.clear().unwrap();
        assert_eq!(session.score(), SimpleScore::new(0.0));
        assert!(session.tuples.is_empty());
        assert_eq!(session.last_flush().released, 5);
    }
}
