pub mod builder;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod external;
pub mod graph;
pub mod query;
pub mod repository;
pub mod retriever;
pub mod similarity;

pub use builder::{BuildReport, CancelFlag, GraphBuilder, SkippedChunk};
pub use chunker::{Chunk, Chunker};
pub use config::{Config, ExtractionMode};
pub use corpus::{load_corpus, Document};
pub use error::RagError;
pub use external::{
    EmbeddingEngine, Embedder, EntityExtractor, ExternalError, Generator, LLMEngine,
};
pub use graph::{EdgeKind, GraphError, GraphStore, NodeId};
pub use query::{answer_with_evidence, EvidenceContext, EvidenceItem, QueryEngine, QueryResponse};
pub use repository::{GraphRepository, WriterSession};
pub use retriever::{ExactScan, Retriever, ScoredPassage, SeedIndex};
