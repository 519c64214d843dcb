//arena.rs
use crate::config::NetworkConfig;
use crate::error::{Result, ScorenetError};
use crate::nodes::{
    FilterNode, FlattenLastNode, ForEachNode, GroupNode, IfExistsNode, JoinNode, MapNode,
    ScorerNode,
};
use crate::score::Score;
use crate::state::TupleState;
use crate::tuple::AnyTuple;
use generational_arena::{Arena, Index};
use slotmap::{DefaultKey, SlotMap};
use std::fmt;

pub type NodeId = DefaultKey;

/// Stable identity of a tuple for as long as it is alive in the network.
///
/// Nodes key their private per-tuple state by this id. Generations make a
/// released id unusable even if its slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId(Index);

impl TupleId {
    #[inline]
    pub fn index(&self) -> Index {
        self.0
    }
}

/// Owner of every tuple the network creates.
pub struct TupleArena {
    arena: Arena<AnyTuple>,
    max_tuples: usize,
    acquired_total: u64,
    released_total: u64,
}

impl TupleArena {
    pub fn new() -> Self {
        Self::with_config(&NetworkConfig::default())
    }

    pub fn with_config(config: &NetworkConfig) -> Self {
        Self {
            arena: Arena::with_capacity(config.initial_queue_capacity),
            max_tuples: config.max_tuples,
            acquired_total: 0,
            released_total: 0,
        }
    }

    pub fn acquire(&mut self, tuple: AnyTuple) -> Result<TupleId> {
        let current = self.arena.len();
        if current >= self.max_tuples {
            return Err(ScorenetError::resource_limit(
                "max_tuples",
                format!("Current: {}, Limit: {}", current, self.max_tuples),
            ));
        }
        self.acquired_total += 1;
        Ok(TupleId(self.arena.insert(tuple)))
    }

    #[inline]
    pub fn get(&self, id: TupleId) -> Result<&AnyTuple> {
        self.arena
            .get(id.0)
            .ok_or_else(|| ScorenetError::invalid_tuple(format!("{:?} is not alive", id)))
    }

    #[inline]
    pub fn get_mut(&mut self, id: TupleId) -> Result<&mut AnyTuple> {
        self.arena
            .get_mut(id.0)
            .ok_or_else(|| ScorenetError::invalid_tuple(format!("{:?} is not alive", id)))
    }

    #[inline]
    pub fn state(&self, id: TupleId) -> Result<TupleState> {
        Ok(self.get(id)?.state())
    }

    #[inline]
    pub fn set_state(&mut self, id: TupleId, state: TupleState) -> Result<()> {
        self.get_mut(id)?.set_state(state);
        Ok(())
    }

    pub fn contains(&self, id: TupleId) -> bool {
        self.arena.contains(id.0)
    }

    /// Drops the tuple. Releasing an id twice is a bookkeeping error.
    pub fn release(&mut self, id: TupleId) -> Result<AnyTuple> {
        let tuple = self
            .arena
            .remove(id.0)
            .ok_or_else(|| ScorenetError::invalid_tuple(format!("{:?} released twice", id)))?;
        self.released_total += 1;
        Ok(tuple)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            live_tuples: self.arena.len(),
            acquired_total: self.acquired_total,
            released_total: self.released_total,
            ..ArenaStats::default()
        };
        for (_, tuple) in self.arena.iter() {
            if tuple.state().is_dirty() {
                stats.dirty_tuples += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub live_tuples: usize,
    pub dirty_tuples: usize,
    pub acquired_total: u64,
    pub released_total: u64,
}

impl fmt::Debug for TupleArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleArena")
            .field("live_tuples", &self.arena.len())
            .field("max_tuples", &self.max_tuples)
            .finish()
    }
}

impl Default for TupleArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Input port of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Single,
    Left,
    Right,
}

/// One edge of the network: the child node and the port it listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Downstream {
    pub node: NodeId,
    pub side: Side,
}

impl Downstream {
    pub fn new(node: NodeId, side: Side) -> Self {
        Self { node, side }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOperation {
    Insert(Downstream, TupleId),
    Update(Downstream, TupleId),
    Retract(Downstream, TupleId),
    /// Tuple is no longer referenced by its owner; freed at the end of the flush.
    Release(TupleId),
}

impl NodeOperation {
    /// Queues one operation of the given kind per child.
    #[inline]
    pub fn fan_out(
        children: &[Downstream],
        tuple: TupleId,
        make: fn(Downstream, TupleId) -> NodeOperation,
        operations: &mut Vec<NodeOperation>,
    ) {
        operations.extend(children.iter().map(|child| make(*child, tuple)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ForEach,
    Filter,
    Join,
    IfExists,
    IfNotExists,
    Group,
    Map,
    FlattenLast,
    Scorer,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::ForEach => "ForEach",
            NodeKind::Filter => "Filter",
            NodeKind::Join => "Join",
            NodeKind::IfExists => "IfExists",
            NodeKind::IfNotExists => "IfNotExists",
            NodeKind::Group => "Group",
            NodeKind::Map => "Map",
            NodeKind::FlattenLast => "FlattenLast",
            NodeKind::Scorer => "Scorer",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum NodeData<S: Score> {
    ForEach(ForEachNode),
    Filter(FilterNode),
    Join(JoinNode),
    IfExists(IfExistsNode),
    Group(GroupNode),
    Map(MapNode),
    FlattenLast(FlattenLastNode),
    Scorer(ScorerNode<S>),
}

impl<S: Score> NodeData<S> {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::ForEach(_) => NodeKind::ForEach,
            NodeData::Filter(_) => NodeKind::Filter,
            NodeData::Join(_) => NodeKind::Join,
            NodeData::IfExists(n) if n.should_exist() => NodeKind::IfExists,
            NodeData::IfExists(_) => NodeKind::IfNotExists,
            NodeData::Group(_) => NodeKind::Group,
            NodeData::Map(_) => NodeKind::Map,
            NodeData::FlattenLast(_) => NodeKind::FlattenLast,
            NodeData::Scorer(_) => NodeKind::Scorer,
        }
    }

    fn wrong_side(&self, side: Side) -> ScorenetError {
        ScorenetError::illegal_state(format!("{} node has no {:?} input", self.kind(), side))
    }

    pub fn insert(
        &mut self,
        side: Side,
        tuple: TupleId,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        match (self, side) {
            (NodeData::ForEach(n), Side::Single) => n.insert(tuple, tuples),
            (NodeData::Filter(n), Side::Single) => n.insert(tuple, tuples, operations),
            (NodeData::Join(n), Side::Left) => n.insert_left(tuple, tuples),
            (NodeData::Join(n), Side::Right) => n.insert_right(tuple, tuples),
            (NodeData::IfExists(n), Side::Left) => n.insert_left(tuple, tuples),
            (NodeData::IfExists(n), Side::Right) => n.insert_right(tuple, tuples),
            (NodeData::Group(n), Side::Single) => n.insert(tuple, tuples),
            (NodeData::Map(n), Side::Single) => n.insert(tuple, tuples),
            (NodeData::FlattenLast(n), Side::Single) => n.insert(tuple, tuples),
            (NodeData::Scorer(n), Side::Single) => n.insert(tuple, tuples),
            (node, side) => Err(node.wrong_side(side)),
        }
    }

    pub fn update(
        &mut self,
        side: Side,
        tuple: TupleId,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        match (self, side) {
            (NodeData::ForEach(n), Side::Single) => n.update(tuple, tuples),
            (NodeData::Filter(n), Side::Single) => n.update(tuple, tuples, operations),
            (NodeData::Join(n), Side::Left) => n.update_left(tuple, tuples),
            (NodeData::Join(n), Side::Right) => n.update_right(tuple, tuples),
            (NodeData::IfExists(n), Side::Left) => n.update_left(tuple, tuples),
            (NodeData::IfExists(n), Side::Right) => n.update_right(tuple, tuples),
            (NodeData::Group(n), Side::Single) => n.update(tuple, tuples),
            (NodeData::Map(n), Side::Single) => n.update(tuple, tuples),
            (NodeData::FlattenLast(n), Side::Single) => n.update(tuple, tuples),
            (NodeData::Scorer(n), Side::Single) => n.update(tuple, tuples),
            (node, side) => Err(node.wrong_side(side)),
        }
    }

    pub fn retract(
        &mut self,
        side: Side,
        tuple: TupleId,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        match (self, side) {
            (NodeData::ForEach(n), Side::Single) => n.retract(tuple, tuples),
            (NodeData::Filter(n), Side::Single) => n.retract(tuple, operations),
            (NodeData::Join(n), Side::Left) => n.retract_left(tuple, tuples),
            (NodeData::Join(n), Side::Right) => n.retract_right(tuple, tuples),
            (NodeData::IfExists(n), Side::Left) => n.retract_left(tuple),
            (NodeData::IfExists(n), Side::Right) => n.retract_right(tuple),
            (NodeData::Group(n), Side::Single) => n.retract(tuple),
            (NodeData::Map(n), Side::Single) => n.retract(tuple, tuples),
            (NodeData::FlattenLast(n), Side::Single) => n.retract(tuple, tuples),
            (NodeData::Scorer(n), Side::Single) => n.retract(tuple),
            (node, side) => Err(node.wrong_side(side)),
        }
    }

    /// Drains the node's dirty queue into downstream operations.
    /// Returns the number of records that were drained.
    pub fn propagate(
        &mut self,
        tuples: &mut TupleArena,
        operations: &mut Vec<NodeOperation>,
    ) -> Result<usize> {
        match self {
            NodeData::ForEach(n) => n.propagate(tuples, operations),
            NodeData::Join(n) => n.propagate(tuples, operations),
            NodeData::IfExists(n) => n.propagate(operations),
            NodeData::Group(n) => n.propagate(tuples, operations),
            NodeData::Map(n) => n.propagate(tuples, operations),
            NodeData::FlattenLast(n) => n.propagate(tuples, operations),
            NodeData::Filter(_) | NodeData::Scorer(_) => Ok(0),
        }
    }

    /// Records waiting in this node's dirty queue.
    pub fn pending(&self) -> usize {
        match self {
            NodeData::ForEach(n) => n.pending(),
            NodeData::Join(n) => n.pending(),
            NodeData::IfExists(n) => n.pending(),
            NodeData::Group(n) => n.pending(),
            NodeData::Map(n) => n.pending(),
            NodeData::FlattenLast(n) => n.pending(),
            NodeData::Filter(_) | NodeData::Scorer(_) => 0,
        }
    }

    pub fn children(&self) -> &[Downstream] {
        match self {
            NodeData::ForEach(n) => &n.children,
            NodeData::Filter(n) => &n.children,
            NodeData::Join(n) => &n.children,
            NodeData::IfExists(n) => &n.children,
            NodeData::Group(n) => &n.children,
            NodeData::Map(n) => &n.children,
            NodeData::FlattenLast(n) => &n.children,
            NodeData::Scorer(_) => &[],
        }
    }

    pub fn add_child(&mut self, child: Downstream) -> Result<()> {
        let children = match self {
            NodeData::ForEach(n) => &mut n.children,
            NodeData::Filter(n) => &mut n.children,
            NodeData::Join(n) => &mut n.children,
            NodeData::IfExists(n) => &mut n.children,
            NodeData::Group(n) => &mut n.children,
            NodeData::Map(n) => &mut n.children,
            NodeData::FlattenLast(n) => &mut n.children,
            NodeData::Scorer(n) => {
                return Err(ScorenetError::network_builder(format!(
                    "scorer for constraint '{}' is terminal and cannot have children",
                    n.constraint_name()
                )))
            }
        };
        if !children.contains(&child) {
            children.push(child);
        }
        Ok(())
    }

    /// Re-derives the node's bookkeeping from scratch and compares it with the
    /// incrementally maintained state.
    pub fn check_invariants(&self, tuples: &TupleArena) -> Result<()> {
        match self {
            NodeData::Group(n) => n.check_invariants(),
            NodeData::IfExists(n) => n.check_invariants(tuples),
            NodeData::Join(n) => n.check_invariants(),
            _ => Ok(()),
        }
    }
}

pub struct NodeArena<S: Score> {
    pub(crate) nodes: SlotMap<NodeId, NodeData<S>>,
}

impl<S: Score> NodeArena<S> {
    pub fn new() -> Self {
        Self { nodes: SlotMap::new() }
    }

    #[inline]
    pub fn insert_node(&mut self, node_data: NodeData<S>) -> NodeId {
        self.nodes.insert(node_data)
    }

    #[inline]
    pub fn get_node(&self, node_id: NodeId) -> Option<&NodeData<S>> {
        self.nodes.get(node_id)
    }

    #[inline]
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut NodeData<S>> {
        self.nodes.get_mut(node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Result<&mut NodeData<S>> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| ScorenetError::illegal_state(format!("unknown node {:?}", node_id)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeData<S>)> {
        self.nodes.iter()
    }

    /// Applies one node-targeted operation, collecting whatever it produces.
    pub fn apply(
        &mut self,
        operation: NodeOperation,
        tuples: &mut TupleArena,
        produced: &mut Vec<NodeOperation>,
    ) -> Result<()> {
        match operation {
            NodeOperation::Insert(to, tuple) => {
                self.node_mut(to.node)?.insert(to.side, tuple, tuples, produced)
            }
            NodeOperation::Update(to, tuple) => {
                self.node_mut(to.node)?.update(to.side, tuple, tuples, produced)
            }
            NodeOperation::Retract(to, tuple) => {
                self.node_mut(to.node)?.retract(to.side, tuple, tuples, produced)
            }
            NodeOperation::Release(_) => Err(ScorenetError::illegal_state(
                "release operations are handled by the scheduler",
            )),
        }
    }
}

impl<S: Score> fmt::Debug for NodeArena<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeArena")
            .field("total_nodes", &self.nodes.len())
            .finish()
    }
}

impl<S: Score> Default for NodeArena<S> {
    fn default() -> Self {
        Self::new()
    }
}
