use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::{Chunk, Chunker};
use crate::config::{GraphConfig, ProcessingConfig};
use crate::corpus::Document;
use crate::error::RagError;
use crate::external::{Embedder, EntityExtractor, ExternalError, ExtractedEntity};
use crate::graph::{EdgeKind, EntityNode, GraphError, GraphStore, NodeId, PassageNode};
use crate::similarity::{bucket_key, cosine_similarity};

/// Cooperative cancellation shared between a build and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A chunk left out of the graph, and why
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedChunk {
    pub document_id: String,
    pub position: usize,
    pub reason: String,
    /// Embedding calls made for the chunk
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub passages_added: usize,
    /// Chunks already present with identical text
    pub unchanged: usize,
    pub entities_added: usize,
    pub sequential_edges: usize,
    pub similar_edges: usize,
    pub mention_edges: usize,
    pub skipped: Vec<SkippedChunk>,
    pub warnings: Vec<String>,
}

impl BuildReport {
    /// True when every chunk made it into the graph without warnings
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.warnings.is_empty()
    }
}

/// Bounded set of passages a new passage is compared against
struct CandidateIndex {
    window: usize,
    bits: usize,
    recent: VecDeque<NodeId>,
    buckets: HashMap<u32, Vec<NodeId>>,
}

impl CandidateIndex {
    fn new(window: usize, bits: usize) -> Self {
        Self {
            window,
            bits,
            recent: VecDeque::with_capacity(window),
            buckets: HashMap::new(),
        }
    }

    fn insert(&mut self, id: NodeId, embedding: &[f32]) {
        if self.window > 0 {
            if self.recent.len() == self.window {
                self.recent.pop_front();
            }
            self.recent.push_back(id);
        }
        self.buckets
            .entry(bucket_key(embedding, self.bits))
            .or_default()
            .push(id);
    }

    /// Recent passages plus those sharing the embedding's bucket, in a stable order
    fn candidates(&self, embedding: &[f32]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let bucket = self
            .buckets
            .get(&bucket_key(embedding, self.bits))
            .into_iter()
            .flatten();
        self.recent
            .iter()
            .chain(bucket)
            .filter(|id| seen.insert(**id))
            .copied()
            .collect()
    }
}

enum ChunkOutcome {
    Unchanged(Chunk),
    Conflict(Chunk),
    Embedded {
        chunk: Chunk,
        embedding: Vec<f32>,
        attempts: u32,
        mentions: Option<Result<Vec<ExtractedEntity>, ExternalError>>,
    },
    Failed {
        chunk: Chunk,
        error: ExternalError,
        attempts: u32,
    },
}

/// Turns documents into passages, entities and edges of a [`GraphStore`]
pub struct GraphBuilder {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    extractor: Option<Arc<dyn EntityExtractor>>,
    graph_config: GraphConfig,
    processing: ProcessingConfig,
}

impl GraphBuilder {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        graph_config: GraphConfig,
        processing: ProcessingConfig,
    ) -> Self {
        Self {
            chunker,
            embedder,
            extractor: None,
            graph_config,
            processing,
        }
    }

    /// Enable entity extraction with the given extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Chunk `documents` and add them to `graph`.
    ///
    /// Per-chunk failures end up in the report. A cancelled build returns
    /// [`RagError::Cancelled`] and leaves `graph` partially updated, so callers
    /// should discard it.
    pub async fn build(
        &self,
        graph: &mut GraphStore,
        documents: &[Document],
        cancel: &CancelFlag,
    ) -> Result<BuildReport, RagError> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunker.chunk(&doc.id, &doc.content))
            .collect();

        let mut report = self.build_chunks(graph, chunks, cancel).await?;
        report.documents = documents.len();
        Ok(report)
    }

    /// Add already chunked text to `graph`, in the given order
    pub async fn build_chunks(
        &self,
        graph: &mut GraphStore,
        chunks: Vec<Chunk>,
        cancel: &CancelFlag,
    ) -> Result<BuildReport, RagError> {
        let build_id = Uuid::new_v4();
        info!(%build_id, chunks = chunks.len(), "Starting graph build");

        let mut report = BuildReport {
            chunks: chunks.len(),
            ..BuildReport::default()
        };

        let mut index = CandidateIndex::new(
            self.graph_config.candidate_window,
            self.graph_config.bucket_bits,
        );
        for passage in graph.passages() {
            index.insert(passage.id, &passage.embedding);
        }

        // Decide against the graph as it was before the build what needs embedding
        let planned: Vec<ChunkOutcome> = chunks
            .into_iter()
            .map(|chunk| match graph.passage(&chunk.id()) {
                Some(existing) if existing.text == chunk.text => ChunkOutcome::Unchanged(chunk),
                Some(_) => ChunkOutcome::Conflict(chunk),
                None => ChunkOutcome::Embedded {
                    chunk,
                    embedding: Vec::new(),
                    attempts: 0,
                    mentions: None,
                },
            })
            .collect();

        let pool = self.processing.max_concurrent_requests.max(1);
        let outcomes =
            stream::iter(planned.into_iter().map(|plan| self.process(plan))).buffered(pool);
        futures::pin_mut!(outcomes);

        let mut previous: Option<(String, NodeId)> = None;
        while let Some(outcome) = outcomes.next().await {
            if cancel.is_cancelled() {
                warn!(%build_id, "Graph build cancelled");
                return Err(RagError::Cancelled);
            }

            let chunk = match outcome {
                ChunkOutcome::Unchanged(chunk) => {
                    report.unchanged += 1;
                    chunk
                }
                ChunkOutcome::Conflict(chunk) => {
                    let reason = GraphError::DuplicateId(chunk.id()).to_string();
                    skip(&mut report, &chunk, reason, 0);
                    continue;
                }
                ChunkOutcome::Failed {
                    chunk,
                    error,
                    attempts,
                } => {
                    warn!(
                        %build_id,
                        document = %chunk.document_id,
                        position = chunk.position,
                        attempts,
                        "Skipping chunk: {}",
                        error
                    );
                    skip(&mut report, &chunk, error.to_string(), attempts);
                    continue;
                }
                ChunkOutcome::Embedded {
                    chunk,
                    embedding,
                    attempts,
                    mentions,
                } => {
                    let passage = PassageNode::new(
                        chunk.document_id.clone(),
                        chunk.position,
                        chunk.heading.clone(),
                        chunk.text.clone(),
                        embedding,
                    );
                    let id = passage.id;
                    if graph.contains(&id) {
                        // Same passage twice in one build
                        if graph.passage(&id).map(|p| p.text == passage.text) == Some(true) {
                            report.unchanged += 1;
                        } else {
                            skip(
                                &mut report,
                                &chunk,
                                GraphError::DuplicateId(id).to_string(),
                                attempts,
                            );
                            continue;
                        }
                    } else {
                        if let Err(e) = graph.add_node(passage) {
                            skip(&mut report, &chunk, e.to_string(), attempts);
                            continue;
                        }
                        report.passages_added += 1;
                        self.link_similar(graph, &mut index, id, &mut report)?;
                    }
                    if let Some(mentions) = mentions {
                        self.add_mentions(graph, id, &chunk, mentions, &mut report)?;
                    }
                    chunk
                }
            };

            let id = chunk.id();
            if let Some((document_id, previous_id)) = &previous {
                if *document_id == chunk.document_id && *previous_id != id {
                    graph.add_edge(*previous_id, id, EdgeKind::Sequential, 1.0)?;
                    report.sequential_edges += 1;
                }
            }
            previous = Some((chunk.document_id, id));
        }

        info!(
            %build_id,
            added = report.passages_added,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            similar = report.similar_edges,
            "Graph build finished"
        );
        Ok(report)
    }

    async fn process(&self, plan: ChunkOutcome) -> ChunkOutcome {
        let chunk = match plan {
            ChunkOutcome::Embedded { chunk, .. } => chunk,
            other => return other,
        };

        let (embedding, attempts) = self.embed_with_retry(&chunk.embedding_text()).await;
        let embedding = match embedding {
            Ok(embedding) => embedding,
            Err(error) => {
                return ChunkOutcome::Failed {
                    chunk,
                    error,
                    attempts,
                }
            }
        };

        let mentions = match &self.extractor {
            Some(extractor) => Some(extractor.extract(&chunk.text).await),
            None => None,
        };

        ChunkOutcome::Embedded {
            chunk,
            embedding,
            attempts,
            mentions,
        }
    }

    /// Embed `text`, retrying with exponential backoff.
    ///
    /// A vector holding NaN or infinite values counts as a failed call.
    /// Returns the last result along with the number of calls made.
    async fn embed_with_retry(&self, text: &str) -> (Result<Vec<f32>, ExternalError>, u32) {
        let max_attempts = self.processing.embed_retries + 1;
        let mut attempt = 1;
        loop {
            let result = self.embedder.embed(text).await.and_then(|embedding| {
                if embedding.iter().all(|value| value.is_finite()) {
                    Ok(embedding)
                } else {
                    Err(ExternalError::EmbeddingUnavailable(
                        "embedding contains non-finite values".to_string(),
                    ))
                }
            });
            match result {
                Ok(embedding) => return (Ok(embedding), attempt),
                Err(e) if attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Wait before the retry that follows call number `attempt`
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.processing.retry_backoff_ms.saturating_mul(factor))
    }

    fn link_similar(
        &self,
        graph: &mut GraphStore,
        index: &mut CandidateIndex,
        id: NodeId,
        report: &mut BuildReport,
    ) -> Result<(), GraphError> {
        let embedding = match graph.passage(&id) {
            Some(passage) => passage.embedding.clone(),
            None => return Err(GraphError::UnknownNode(id)),
        };

        let mut similar = Vec::new();
        for candidate in index.candidates(&embedding) {
            if candidate == id {
                continue;
            }
            let Some(other) = graph.passage(&candidate) else {
                continue;
            };
            let score = cosine_similarity(&embedding, &other.embedding);
            if score >= self.graph_config.similarity_threshold {
                similar.push((candidate, score.clamp(0.0, 1.0)));
            }
        }

        for (candidate, score) in similar {
            graph.add_edge(id, candidate, EdgeKind::Similar, score)?;
            report.similar_edges += 1;
        }
        index.insert(id, &embedding);
        Ok(())
    }

    fn add_mentions(
        &self,
        graph: &mut GraphStore,
        passage: NodeId,
        chunk: &Chunk,
        mentions: Result<Vec<ExtractedEntity>, ExternalError>,
        report: &mut BuildReport,
    ) -> Result<(), GraphError> {
        let entities = match mentions {
            Ok(entities) => entities,
            Err(e) => {
                warn!(
                    document = %chunk.document_id,
                    position = chunk.position,
                    "Entity extraction failed: {}",
                    e
                );
                report.warnings.push(format!(
                    "{}#{}: entity extraction failed: {}",
                    chunk.document_id, chunk.position, e
                ));
                return Ok(());
            }
        };

        for entity in entities {
            if entity.label.trim().is_empty() || !(0.0..=1.0).contains(&entity.confidence) {
                report.warnings.push(format!(
                    "{}#{}: ignored mention {:?} with confidence {}",
                    chunk.document_id, chunk.position, entity.label, entity.confidence
                ));
                continue;
            }

            let node = EntityNode::new(&entity.label, entity.entity_type);
            let entity_id = node.id;
            if !graph.contains(&entity_id) {
                graph.add_node(node)?;
                report.entities_added += 1;
            }
            graph.add_edge(passage, entity_id, EdgeKind::Mentions, entity.confidence)?;
            report.mention_edges += 1;
        }
        Ok(())
    }
}

fn skip(report: &mut BuildReport, chunk: &Chunk, reason: String, attempts: u32) {
    report.skipped.push(SkippedChunk {
        document_id: chunk.document_id.clone(),
        position: chunk.position,
        reason,
        attempts,
    });
}
