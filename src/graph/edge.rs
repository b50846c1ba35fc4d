use serde::{Deserialize, Serialize};

use crate::graph::node::NodeId;

/// Type of relationship between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Sequential, // Document order, directed
    Similar,    // Embedding similarity, undirected
    Mentions,   // Passage mentions entity, undirected
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Sequential, EdgeKind::Similar, EdgeKind::Mentions];

    pub fn is_directed(&self) -> bool {
        matches!(self, EdgeKind::Sequential)
    }
}

/// Represents an edge in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: f32,
}

impl GraphEdge {
    /// Create an edge; undirected kinds get their endpoints in canonical order.
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind, weight: f32) -> Self {
        let (source, target) = if !kind.is_directed() && target < source {
            (target, source)
        } else {
            (source, target)
        };
        Self {
            source,
            target,
            kind,
            weight,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source,
            target: self.target,
            kind: self.kind,
        }
    }

    /// The endpoint opposite to `id`, if this edge touches `id`
    pub fn other(&self, id: NodeId) -> Option<NodeId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Identity of an edge: at most one edge exists per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}
