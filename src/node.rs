//! Graph metadata: node identity and the registry the [`crate::pipeline::PipelineManager`]
//! builds up while the caller wires the pipeline together.
//!
//! Queues, tasks, and operators are strongly typed per edge (see
//! [`crate::queue::Queue`]); this module holds only the *untyped* bookkeeping
//! needed to answer graph-shaped questions later — "what are this node's
//! children", "what is its display name" — without requiring the registry
//! itself to be generic over every item type in the pipeline.

use std::collections::HashMap;
use uuid::Uuid;

/// Identifies a node (queue, task, or operator) in the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a graph node, mirroring the three node variants in the spec's
/// data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NodeKind {
    Queue,
    Task,
    Op,
}

/// Untyped graph metadata for one node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` for an anonymous queue (one the caller never named).
    pub name: Option<String>,
    pub children: Vec<NodeId>,
}

impl NodeInfo {
    fn new(id: NodeId, kind: NodeKind, name: Option<String>) -> Self {
        Self {
            id,
            kind,
            name,
            children: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{:?}:{}", self.kind, &self.id.to_string()[..8]),
        }
    }
}

/// Registry of nodes and directed edges the manager accumulates during the
/// build phase. Read-only once `run()` has started (§5).
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, NodeInfo>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, kind: NodeKind, name: Option<String>) -> NodeId {
        let id = NodeId::new();
        self.nodes.insert(id, NodeInfo::new(id, kind, name));
        id
    }

    /// Register a node under an id minted elsewhere — used for queues,
    /// whose [`NodeId`] is assigned at construction time rather than at
    /// graph-registration time. A no-op if `id` is already present, so
    /// re-registering the same queue on a second edge is harmless.
    pub fn insert_existing(&mut self, id: NodeId, kind: NodeKind, name: Option<String>) {
        self.nodes
            .entry(id)
            .or_insert_with(|| NodeInfo::new(id, kind, name));
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if let Some(info) = self.nodes.get_mut(&from) {
            info.children.push(to);
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
