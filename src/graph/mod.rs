pub mod edge;
pub mod error;
pub mod node;
pub mod persist;
pub mod store;

pub use edge::{EdgeKey, EdgeKind, GraphEdge};
pub use error::GraphError;
pub use node::{normalize_label, EntityNode, GraphNode, NodeId, PassageNode};
pub use persist::{load_graph, save_graph, GraphReader, GraphRecord, GRAPH_FILE_NAME};
pub use store::GraphStore;
