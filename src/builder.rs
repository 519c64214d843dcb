//builder.rs
use crate::arena::{Downstream, NodeArena, NodeData, NodeId, NodeKind, Side, TupleArena};
use crate::config::NetworkConfig;
use crate::constraint::{ConstraintDefinition, ConstraintId, ConstraintWeights};
use crate::error::{Result, ScorenetError};
use crate::node_sharing::{NodeKey, NodeSharingManager};
use crate::nodes::{
    FilterNode, FlattenLastNode, ForEachNode, GroupNode, IfExistsNode, JoinNode, MapNode,
    ScorerNode,
};
use crate::scheduler::FlushScheduler;
use crate::score::Score;
use crate::session::Session;
use crate::stream_def::{Stream, StreamDefinition};
use crate::tuple::MAX_ARITY;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use smallvec::SmallVec;
use std::any::TypeId;
use tracing::debug;

/// Turns constraint definitions into a wired node network.
///
/// Each constraint's pipeline is walked once. Steps that are structurally
/// identical to an already built step (same operation, same parents, same
/// user functions) reuse that node. Every constraint gets its own scorer.
///
/// ```
/// use scorenet::{NetworkBuilder, SimpleScore, Stream};
///
/// let values = Stream::for_each::<i64>();
/// let mut builder = NetworkBuilder::<SimpleScore>::new();
/// builder.add_constraint(values.filter(|_| true).penalize("All", SimpleScore::new(1.0))).unwrap();
/// builder.add_constraint(values.penalize("Also all", SimpleScore::new(2.0))).unwrap();
/// let session = builder.build().unwrap();
/// assert_eq!(session.statistics().total_nodes, 4);
/// ```
pub struct NetworkBuilder<S: Score> {
    config: NetworkConfig,
    nodes: NodeArena<S>,
    sharing: NodeSharingManager,
    layers: HashMap<NodeId, usize>,
    creation_order: Vec<NodeId>,
    for_each_nodes: HashMap<TypeId, NodeId>,
    scorers: Vec<NodeId>,
    constraint_names: HashSet<String>,
    weights: ConstraintWeights,
}

impl<S: Score> NetworkBuilder<S> {
    pub fn new() -> Self {
        Self::from_valid_config(NetworkConfig::default())
    }

    pub fn with_config(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: NetworkConfig) -> Self {
        let weights = ConstraintWeights::from_config(&config);
        Self {
            config,
            nodes: NodeArena::new(),
            sharing: NodeSharingManager::new(),
            layers: HashMap::default(),
            creation_order: Vec::new(),
            for_each_nodes: HashMap::default(),
            scorers: Vec::new(),
            constraint_names: HashSet::default(),
            weights,
        }
    }

    /// Builds the pipeline of `constraint` and attaches a scorer to its end.
    pub fn add_constraint(&mut self, constraint: ConstraintDefinition<S>) -> Result<ConstraintId> {
        if !self.constraint_names.insert(constraint.name.clone()) {
            return Err(ScorenetError::network_builder(format!(
                "constraint '{}' is defined twice",
                constraint.name
            )));
        }
        let parent = self.build_stream(&constraint.stream)?;
        let tolerate_absent = matches!(self.nodes.get_node(parent), Some(NodeData::Filter(_)));

        let constraint_id = self.weights.get_or_create_id(&constraint.name);
        let multiplier = self.weights.get_weight(constraint_id);
        let scorer = ScorerNode::new(
            constraint_id,
            constraint.name.clone(),
            constraint.constraint_weight,
            constraint.impact_type,
            multiplier,
            constraint.weigher,
            tolerate_absent,
        );
        let scorer_id = self.create_node(NodeData::Scorer(scorer), &[(parent, Side::Single)])?;
        self.scorers.push(scorer_id);
        debug!(
            constraint = %constraint.name,
            multiplier,
            layer = self.layer(scorer_id),
            "added constraint"
        );
        Ok(constraint_id)
    }

    pub fn add_constraints(
        &mut self,
        constraints: impl IntoIterator<Item = ConstraintDefinition<S>>,
    ) -> Result<Vec<ConstraintId>> {
        constraints
            .into_iter()
            .map(|constraint| self.add_constraint(constraint))
            .collect()
    }

    /// Chaining form of [`add_constraint`](Self::add_constraint).
    pub fn constraint(mut self, constraint: ConstraintDefinition<S>) -> Result<Self> {
        self.add_constraint(constraint)?;
        Ok(self)
    }

    fn layer(&self, node: NodeId) -> usize {
        self.layers.get(&node).copied().unwrap_or(0)
    }

    fn build_stream(&mut self, stream: &Stream) -> Result<NodeId> {
        let (key, parents) = match stream.definition() {
            StreamDefinition::ForEach { fact_type, .. } => (NodeKey::ForEach(*fact_type), SmallVec::new()),
            StreamDefinition::Filter { source, predicate } => {
                let parent = self.build_stream(source)?;
                (
                    NodeKey::Filter {
                        parent,
                        predicate: predicate.id(),
                    },
                    single(parent),
                )
            }
            StreamDefinition::Join { left, right, joiners } => {
                if left.arity() + right.arity() > MAX_ARITY {
                    return Err(ScorenetError::network_builder(format!(
                        "join of arity {} and {} exceeds the maximum tuple arity {}",
                        left.arity(),
                        right.arity(),
                        MAX_ARITY
                    )));
                }
                let left = self.build_stream(left)?;
                let right = self.build_stream(right)?;
                (
                    NodeKey::Join {
                        left,
                        right,
                        joiners: joiners.identity(),
                    },
                    both(left, right),
                )
            }
            StreamDefinition::IfExists {
                source,
                other,
                joiners,
                should_exist,
            } => {
                let left = self.build_stream(source)?;
                let right = self.build_stream(other)?;
                (
                    NodeKey::IfExists {
                        left,
                        right,
                        joiners: joiners.identity(),
                        should_exist: *should_exist,
                    },
                    both(left, right),
                )
            }
            StreamDefinition::GroupBy {
                source,
                keys,
                collectors,
            } => {
                let arity = keys.len() + collectors.len();
                if arity == 0 || arity > MAX_ARITY {
                    return Err(ScorenetError::network_builder(format!(
                        "group by with {} keys and {} collectors has output arity {}, expected 1 to {}",
                        keys.len(),
                        collectors.len(),
                        arity,
                        MAX_ARITY
                    )));
                }
                let parent = self.build_stream(source)?;
                (
                    NodeKey::Group {
                        parent,
                        keys: keys.iter().map(|key| key.id()).collect(),
                        collectors: collectors.iter().map(|collector| collector.id()).collect(),
                    },
                    single(parent),
                )
            }
            StreamDefinition::Map {
                source,
                mapper,
                arity,
            } => {
                if *arity == 0 || *arity > MAX_ARITY {
                    return Err(ScorenetError::network_builder(format!(
                        "map to arity {}, expected 1 to {}",
                        arity, MAX_ARITY
                    )));
                }
                let parent = self.build_stream(source)?;
                (
                    NodeKey::Map {
                        parent,
                        mapper: mapper.id(),
                        arity: *arity,
                    },
                    single(parent),
                )
            }
            StreamDefinition::FlattenLast { source, flattener } => {
                let parent = self.build_stream(source)?;
                (
                    NodeKey::FlattenLast {
                        parent,
                        flattener: flattener.id(),
                    },
                    single(parent),
                )
            }
        };

        if let Some(shared) = self.sharing.get_node(&key) {
            debug!(kind = %self.kind_of(shared), "reusing shared node");
            return Ok(shared);
        }

        let node_id = self.create_node(Self::node_for(stream.definition()), &parents)?;
        if let StreamDefinition::ForEach { fact_type, .. } = stream.definition() {
            self.for_each_nodes.insert(*fact_type, node_id);
        }
        self.sharing.register_node(key, node_id);
        Ok(node_id)
    }

    fn node_for(definition: &StreamDefinition) -> NodeData<S> {
        match definition {
            StreamDefinition::ForEach { fact_type, type_name } => {
                NodeData::ForEach(ForEachNode::new(*fact_type, *type_name))
            }
            StreamDefinition::Filter { predicate, .. } => NodeData::Filter(FilterNode::new(predicate.clone())),
            StreamDefinition::Join { joiners, .. } => NodeData::Join(JoinNode::new(joiners.clone())),
            StreamDefinition::IfExists {
                joiners,
                should_exist,
                ..
            } => NodeData::IfExists(IfExistsNode::new(*should_exist, joiners.clone())),
            StreamDefinition::GroupBy { keys, collectors, .. } => {
                NodeData::Group(GroupNode::new(keys.clone(), collectors.clone()))
            }
            StreamDefinition::Map { mapper, arity, .. } => NodeData::Map(MapNode::new(mapper.clone(), *arity)),
            StreamDefinition::FlattenLast { flattener, .. } => {
                NodeData::FlattenLast(FlattenLastNode::new(flattener.clone()))
            }
        }
    }

    fn kind_of(&self, node: NodeId) -> NodeKind {
        self.nodes
            .get_node(node)
            .map_or(NodeKind::Scorer, |data| data.kind())
    }

    /// Inserts `data` one layer below its deepest parent and subscribes it
    /// to every parent on the given side.
    fn create_node(&mut self, data: NodeData<S>, parents: &[(NodeId, Side)]) -> Result<NodeId> {
        let layer = parents
            .iter()
            .map(|(parent, _)| self.layer(*parent) + 1)
            .max()
            .unwrap_or(0);
        let kind = data.kind();
        let node_id = self.nodes.insert_node(data);
        for (parent, side) in parents {
            self.nodes
                .node_mut(*parent)?
                .add_child(Downstream::new(node_id, *side))?;
        }
        self.layers.insert(node_id, layer);
        self.creation_order.push(node_id);
        debug!(%kind, layer, "created node");
        Ok(node_id)
    }

    /// Freezes the network into a session. Nodes are drained in layer order,
    /// parents always before children.
    pub fn build(self) -> Result<Session<S>> {
        let mut order = self.creation_order;
        let layers = self.layers;
        order.sort_by_key(|node| layers.get(node).copied().unwrap_or(0));
        let layer_count = order
            .last()
            .and_then(|node| layers.get(node))
            .map_or(0, |layer| layer + 1);

        debug!(
            nodes = self.nodes.len(),
            constraints = self.scorers.len(),
            shared = self.sharing.reuse_count(),
            layers = layer_count,
            "built network"
        );

        Ok(Session::new(
            self.nodes,
            TupleArena::with_config(&self.config),
            FlushScheduler::new(order, self.config),
            self.for_each_nodes,
            self.scorers,
            self.weights,
            layers,
            self.sharing.reuse_count(),
        ))
    }
}

impl<S: Score> Default for NetworkBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Score> std::fmt::Debug for NetworkBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkBuilder")
            .field("nodes", &self.nodes.len())
            .field("constraints", &self.scorers.len())
            .field("shared", &self.sharing.reuse_count())
            .field("config", &self.config)
            .finish()
    }
}

fn single(parent: NodeId) -> SmallVec<[(NodeId, Side); 2]> {
    smallvec::smallvec![(parent, Side::Single)]
}

fn both(left: NodeId, right: NodeId) -> SmallVec<[(NodeId, Side); 2]> {
    smallvec::smallvec![(left, Side::Left), (right, Side::Right)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Collectors;
    use crate::joiner::Joiners;
    use crate::score::SimpleScore;
    use crate::stream_def::fact_at;
    use std::rc::Rc;

    fn values() -> Stream {
        Stream::for_each::<i64>()
    }

    #[test]
    fn duplicate_constraint_names_are_rejected() {
        let mut builder = NetworkBuilder::<SimpleScore>::new();
        builder.add_constraint(values().penalize("Values", SimpleScore::new(1.0))).unwrap();
        let error = builder
            .add_constraint(values().reward("Values", SimpleScore::new(1.0)))
            .unwrap_err();
        assert!(matches!(error, ScorenetError::NetworkBuilder { .. }));
    }

    #[test]
    fn shared_prefixes_become_one_node() {
        let positive = values().filter(|t| t.get::<i64>(0).map_or(false, |v| *v > 0));
        let mut builder = NetworkBuilder::<SimpleScore>::new();
        builder.add_constraint(positive.penalize("A", SimpleScore::new(1.0))).unwrap();
        builder.add_constraint(positive.reward("B", SimpleScore::new(1.0))).unwrap();
        assert_eq!(builder.nodes.len(), 4);
        // The second constraint reuses both the ForEach and the Filter node.
        assert_eq!(builder.sharing.reuse_count(), 2);

        // A separately written but identical filter closure is a different node.
        builder
            .add_constraint(
                values()
                    .filter(|t| t.get::<i64>(0).map_or(false, |v| *v > 0))
                    .penalize("C", SimpleScore::new(1.0)),
            )
            .unwrap();
        assert_eq!(builder.nodes.len(), 6);
        assert_eq!(builder.sharing.reuse_count(), 3);
    }

    #[test]
    fn layers_follow_the_deepest_parent() {
        let mut builder = NetworkBuilder::<SimpleScore>::new();
        let joined = values()
            .filter(|_| true)
            .join(&Stream::for_each::<String>(), Joiners::new());
        builder.add_constraint(joined.penalize("Pairs", SimpleScore::new(1.0))).unwrap();
        let layers: Vec<usize> = builder
            .creation_order
            .iter()
            .map(|node| builder.layer(*node))
            .collect();
        assert_eq!(layers, vec![0, 1, 0, 2, 3]);
    }

    #[test]
    fn arity_limits_are_checked() {
        let wide = values().join(&values(), Joiners::new()).join(&values(), Joiners::new());
        let too_wide = wide.join(&values().join(&values(), Joiners::new()), Joiners::new());
        let mut builder = NetworkBuilder::<SimpleScore>::new();
        assert!(builder.add_constraint(too_wide.penalize("Five", SimpleScore::new(1.0))).is_err());

        let empty_group = values().group_by(Vec::new(), Vec::new());
        assert!(builder
            .add_constraint(empty_group.penalize("Nothing", SimpleScore::new(1.0)))
            .is_err());

        let mapped = values().map(0, |_| smallvec::SmallVec::new());
        assert!(builder.add_constraint(mapped.penalize("Empty", SimpleScore::new(1.0))).is_err());

        let grouped = values().group_by([fact_at(0)], [Collectors::count()]);
        assert!(builder.add_constraint(grouped.penalize("Counted", SimpleScore::new(1.0))).is_ok());
    }

    #[test]
    fn scorer_under_a_filter_tolerates_absent_retracts() {
        let mut builder = NetworkBuilder::<SimpleScore>::new();
        builder
            .add_constraint(values().filter(|_| false).penalize("None", SimpleScore::new(1.0)))
            .unwrap();
        let session = builder.build().unwrap();
        let mut session = session;
        session.insert(Rc::new(3i64)).unwrap();
        session.flush().unwrap();
        session.retract(&3i64).unwrap();
        assert_eq!(session.calculate_score().unwrap(), SimpleScore::new(0.0));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = NetworkConfig {
            max_tuples: 0,
            ..NetworkConfig::default()
        };
        assert!(NetworkBuilder::<SimpleScore>::with_config(config).is_err());
    }
}
