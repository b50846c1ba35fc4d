use thiserror::Error;

use crate::graph::node::NodeId;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateId(NodeId),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid edge weight {0}: must lie in [0, 1]")]
    InvalidWeight(f32),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding of {0} contains non-finite values")]
    NonFiniteEmbedding(NodeId),

    #[error("Corrupt graph file: {0}")]
    CorruptGraph(String),

    #[error("Graph storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
