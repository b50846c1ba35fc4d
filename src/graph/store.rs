use petgraph::{
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use std::collections::HashMap;

use crate::graph::{
    edge::{EdgeKey, EdgeKind, GraphEdge},
    error::GraphError,
    node::{EntityNode, GraphNode, NodeId, PassageNode},
    persist,
};

/// Knowledge graph of passages and entities
///
/// Node ids are unique and every edge references nodes that exist; both are
/// checked on insertion, so a `GraphStore` never holds a dangling edge.
#[derive(Debug, Clone)]
pub struct GraphStore {
    /// The underlying graph structure
    graph: DiGraph<GraphNode, GraphEdge>,
    /// Mapping from node id to node index for quick lookups
    node_map: HashMap<NodeId, NodeIndex>,
    /// One edge per (source, target, kind)
    edge_map: HashMap<EdgeKey, EdgeIndex>,
    /// Embedding dimensionality shared by every passage
    dimension: Option<usize>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            edge_map: HashMap::new(),
            dimension: None,
        }
    }

    /// Add a node to the graph.
    ///
    /// Adding a node equal to one already stored is a no-op; a different node
    /// under an existing id fails with [`GraphError::DuplicateId`]. Passages
    /// whose embedding holds NaN or infinite values are rejected, since the
    /// persisted format cannot represent them.
    pub fn add_node(&mut self, node: impl Into<GraphNode>) -> Result<NodeId, GraphError> {
        let node = node.into();
        let id = node.id();

        if let GraphNode::Passage(passage) = &node {
            if !passage.embedding.iter().all(|value| value.is_finite()) {
                return Err(GraphError::NonFiniteEmbedding(id));
            }
        }

        if let Some(idx) = self.node_map.get(&id) {
            if self.graph[*idx] == node {
                return Ok(id);
            }
            return Err(GraphError::DuplicateId(id));
        }

        if let GraphNode::Passage(passage) = &node {
            let actual = passage.embedding.len();
            match self.dimension {
                Some(expected) if expected != actual => {
                    return Err(GraphError::DimensionMismatch { expected, actual });
                }
                Some(_) => {}
                None => self.dimension = Some(actual),
            }
        }

        let idx = self.graph.add_node(node);
        self.node_map.insert(id, idx);
        Ok(id)
    }

    /// Add an edge between two existing nodes.
    ///
    /// Re-adding an edge with the same (source, target, kind) keeps the larger weight.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        weight: f32,
    ) -> Result<(), GraphError> {
        let edge = GraphEdge::new(source, target, kind, weight);
        let from_idx = self.index_of(&edge.source)?;
        let to_idx = self.index_of(&edge.target)?;

        if !(0.0..=1.0).contains(&weight) {
            return Err(GraphError::InvalidWeight(weight));
        }

        let key = edge.key();
        match self.edge_map.get(&key) {
            Some(idx) => {
                let existing = &mut self.graph[*idx];
                if weight > existing.weight {
                    existing.weight = weight;
                }
            }
            None => {
                let idx = self.graph.add_edge(from_idx, to_idx, edge);
                self.edge_map.insert(key, idx);
            }
        }
        Ok(())
    }

    /// Neighbors of `id` over the given edge kinds, best weight first.
    ///
    /// Sequential edges are followed in document order only. Equal weights are
    /// ordered by ascending neighbor id.
    pub fn neighbors(
        &self,
        id: NodeId,
        kinds: &[EdgeKind],
        max_count: usize,
    ) -> Result<Vec<(NodeId, f32)>, GraphError> {
        let idx = self.index_of(&id)?;
        let mut best: HashMap<NodeId, f32> = HashMap::new();

        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge_ref in self.graph.edges_directed(idx, direction) {
                let edge = edge_ref.weight();
                if !kinds.contains(&edge.kind) {
                    continue;
                }
                if direction == Direction::Incoming && edge.kind.is_directed() {
                    continue;
                }
                let Some(neighbor) = edge.other(id) else {
                    continue;
                };
                if neighbor == id {
                    continue;
                }
                best.entry(neighbor)
                    .and_modify(|w| *w = w.max(edge.weight))
                    .or_insert(edge.weight);
            }
        }

        let mut neighbors: Vec<(NodeId, f32)> = best.into_iter().collect();
        neighbors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        neighbors.truncate(max_count);
        Ok(neighbors)
    }

    /// Merge another graph into this one.
    ///
    /// Entities with the same normalized label collapse into the node already
    /// present here. Edge weights for the same key resolve to the maximum.
    /// Conflicting passages or dimensions fail before anything is changed.
    pub fn merge(&mut self, other: &GraphStore) -> Result<(), GraphError> {
        if let (Some(expected), Some(actual)) = (self.dimension, other.dimension) {
            if expected != actual {
                return Err(GraphError::DimensionMismatch { expected, actual });
            }
        }
        for node in other.graph.node_weights() {
            if let (GraphNode::Passage(incoming), Some(GraphNode::Passage(existing))) =
                (node, self.node(&node.id()))
            {
                if incoming != existing {
                    return Err(GraphError::DuplicateId(incoming.id));
                }
            }
        }

        for node in other.graph.node_weights() {
            if !self.contains(&node.id()) {
                self.add_node(node.clone())?;
            }
        }
        for edge in other.graph.edge_weights() {
            self.add_edge(edge.source, edge.target, edge.kind, edge.weight)?;
        }
        Ok(())
    }

    /// Serialize the graph into the persisted line format
    pub fn serialize(&self) -> Result<Vec<u8>, GraphError> {
        let mut buffer = Vec::new();
        persist::write_graph(self, &mut buffer)?;
        Ok(buffer)
    }

    /// Rebuild a graph from bytes produced by [`GraphStore::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<Self, GraphError> {
        persist::read_graph(bytes)
    }

    /// Get a reference to a node by its id
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.node_map.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn passage(&self, id: &NodeId) -> Option<&PassageNode> {
        self.node(id).and_then(GraphNode::as_passage)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_map.contains_key(id)
    }

    pub fn contains_edge(&self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        let key = GraphEdge::new(source, target, kind, 0.0).key();
        self.edge_map.contains_key(&key)
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn passages(&self) -> impl Iterator<Item = &PassageNode> {
        self.graph.node_weights().filter_map(GraphNode::as_passage)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityNode> {
        self.graph.node_weights().filter_map(GraphNode::as_entity)
    }

    /// All edges, in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Embedding dimensionality, fixed by the first passage
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn index_of(&self, id: &NodeId) -> Result<NodeIndex, GraphError> {
        self.node_map
            .get(id)
            .copied()
            .ok_or(GraphError::UnknownNode(*id))
    }
}
