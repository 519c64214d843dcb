//node_sharing.rs
use crate::arena::NodeId;
use crate::joiner::JoinersIdentity;
use rustc_hash::FxHashMap as HashMap;
use smallvec::SmallVec;
use std::any::TypeId;

/// Structural identity of a node: what it does, which nodes feed it and
/// which user functions it runs. Two pipeline steps with equal keys are
/// served by the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    ForEach(TypeId),
    Filter {
        parent: NodeId,
        predicate: usize,
    },
    Join {
        left: NodeId,
        right: NodeId,
        joiners: JoinersIdentity,
    },
    IfExists {
        left: NodeId,
        right: NodeId,
        joiners: JoinersIdentity,
        should_exist: bool,
    },
    Group {
        parent: NodeId,
        keys: SmallVec<[usize; 4]>,
        collectors: SmallVec<[usize; 4]>,
    },
    Map {
        parent: NodeId,
        mapper: usize,
        arity: usize,
    },
    FlattenLast {
        parent: NodeId,
        flattener: usize,
    },
}

/// Hash-consing table consulted before a node is created.
#[derive(Debug, Default)]
pub struct NodeSharingManager {
    nodes: HashMap<NodeKey, NodeId>,
    reuse_count: usize,
}

impl NodeSharingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node already built for `key`, counting the reuse.
    pub fn get_node(&mut self, key: &NodeKey) -> Option<NodeId> {
        let found = self.nodes.get(key).copied();
        if found.is_some() {
            self.reuse_count += 1;
        }
        found
    }

    pub fn register_node(&mut self, key: NodeKey, node_id: NodeId) {
        self.nodes.insert(key, node_id);
    }

    /// How many times a pipeline step was mapped onto an existing node.
    pub fn reuse_count(&self) -> usize {
        self.reuse_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
