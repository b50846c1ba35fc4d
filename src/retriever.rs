use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::RagError;
use crate::external::Embedder;
use crate::graph::{EdgeKind, GraphError, GraphStore, NodeId, PassageNode};
use crate::similarity::cosine_similarity;

const FIRST_HOP_KINDS: &[EdgeKind] = &EdgeKind::ALL;
const LATER_HOP_KINDS: &[EdgeKind] = &[EdgeKind::Similar, EdgeKind::Mentions];

/// Strategy picking the passages a traversal starts from
pub trait SeedIndex: Send + Sync {
    /// Up to `count` passages most similar to `query`, best first.
    /// Only strictly positive similarities qualify.
    fn seeds(&self, graph: &GraphStore, query: &[f32], count: usize) -> Vec<(NodeId, f32)>;
}

/// Cosine similarity against every passage
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactScan;

impl SeedIndex for ExactScan {
    fn seeds(&self, graph: &GraphStore, query: &[f32], count: usize) -> Vec<(NodeId, f32)> {
        let mut scored: Vec<(NodeId, f32)> = graph
            .passages()
            .map(|p| (p.id, cosine_similarity(query, &p.embedding)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(count);
        scored
    }
}

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: PassageNode,
    pub score: f32,
}

/// Seed-and-expand retrieval over a graph snapshot
pub struct Retriever {
    graph: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
    seed_index: Arc<dyn SeedIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        graph: Arc<GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            graph,
            embedder,
            seed_index: Arc::new(ExactScan),
            config,
        }
    }

    pub fn with_seed_index(mut self, seed_index: Arc<dyn SeedIndex>) -> Self {
        self.seed_index = seed_index;
        self
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The `k` passages most relevant to `query`.
    ///
    /// An empty graph yields no passages without calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        hop_budget: usize,
    ) -> Result<Vec<ScoredPassage>, RagError> {
        validate_k(k)?;
        if self.graph.passages().next().is_none() {
            debug!("Graph has no passages, nothing to retrieve");
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        self.rank(&embedding, k, hop_budget)
    }

    /// Rank passages for an already embedded query
    pub fn rank(
        &self,
        query: &[f32],
        k: usize,
        hop_budget: usize,
    ) -> Result<Vec<ScoredPassage>, RagError> {
        validate_k(k)?;
        if let Some(expected) = self.graph.dimension() {
            if expected != query.len() {
                return Err(GraphError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                }
                .into());
            }
        }

        let seed_count = k.saturating_mul(self.config.seed_multiplier.max(1));
        let seeds = self.seed_index.seeds(&self.graph, query, seed_count);
        debug!(seeds = seeds.len(), hop_budget, "Expanding seeds");

        let mut scores: HashMap<NodeId, f32> = HashMap::new();
        for (seed, similarity) in seeds {
            self.expand(seed, similarity, hop_budget, &mut scores)?;
        }

        let mut results: Vec<ScoredPassage> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                self.graph.passage(&id).map(|passage| ScoredPassage {
                    passage: passage.clone(),
                    score,
                })
            })
            .collect();
        results.sort_by(compare_results);
        results.truncate(k);
        Ok(results)
    }

    /// Breadth-first walk from one seed, keeping the best score per node
    fn expand(
        &self,
        seed: NodeId,
        similarity: f32,
        hop_budget: usize,
        scores: &mut HashMap<NodeId, f32>,
    ) -> Result<(), GraphError> {
        let mut visited = HashSet::from([seed]);
        let mut frontier = vec![seed];
        keep_best(scores, seed, similarity);

        for hop in 1..=hop_budget {
            let kinds = if hop == 1 {
                FIRST_HOP_KINDS
            } else {
                LATER_HOP_KINDS
            };
            let score = similarity * self.config.decay.powi(hop as i32);

            let mut next = Vec::new();
            for node in &frontier {
                for (neighbor, _) in self.graph.neighbors(*node, kinds, self.config.max_fanout)? {
                    if visited.insert(neighbor) {
                        keep_best(scores, neighbor, score);
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(())
    }
}

fn validate_k(k: usize) -> Result<(), RagError> {
    if k == 0 {
        return Err(RagError::InvalidArgument("k must be at least 1".to_string()));
    }
    Ok(())
}

fn keep_best(scores: &mut HashMap<NodeId, f32>, id: NodeId, score: f32) {
    scores
        .entry(id)
        .and_modify(|best| *best = best.max(score))
        .or_insert(score);
}

fn compare_results(a: &ScoredPassage, b: &ScoredPassage) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.passage.position.cmp(&b.passage.position))
        .then_with(|| a.passage.document_id.cmp(&b.passage.document_id))
        .then_with(|| a.passage.id.cmp(&b.passage.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ExternalError, MockEmbedder};
    use crate::graph::EntityNode;

    fn passage(position: usize, embedding: Vec<f32>) -> PassageNode {
        PassageNode::new(
            "lecture.md",
            position,
            None,
            format!("Passage {}", position),
            embedding,
        )
    }

    /// A -> B -> C in document order, A and C similar
    fn chain(c_embedding: Vec<f32>) -> GraphStore {
        let mut graph = GraphStore::new();
        let a = graph.add_node(passage(0, vec![1.0, 0.0])).unwrap();
        let b = graph.add_node(passage(1, vec![0.0, 1.0])).unwrap();
        let c = graph.add_node(passage(2, c_embedding)).unwrap();
        graph.add_edge(a, b, EdgeKind::Sequential, 1.0).unwrap();
        graph.add_edge(b, c, EdgeKind::Sequential, 1.0).unwrap();
        graph.add_edge(a, c, EdgeKind::Similar, 0.9).unwrap();
        graph
    }

    fn retriever(graph: GraphStore) -> Retriever {
        Retriever::new(
            Arc::new(graph),
            Arc::new(MockEmbedder::new()),
            RetrievalConfig::default(),
        )
    }

    fn positions(results: &[ScoredPassage]) -> Vec<usize> {
        results.iter().map(|r| r.passage.position).collect()
    }

    #[test]
    fn test_one_hop_from_single_seed() {
        let retriever = retriever(chain(vec![0.0, 1.0]));

        let results = retriever.rank(&[1.0, 0.0], 3, 1).unwrap();

        assert_eq!(positions(&results), vec![0, 1, 2]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 0.7).abs() < 1e-6);
        assert!((results[2].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_seed_similarity_beats_expansion() {
        let retriever = retriever(chain(vec![0.8, 0.6]));

        let results = retriever.rank(&[1.0, 0.0], 3, 1).unwrap();

        assert_eq!(positions(&results), vec![0, 2, 1]);
        assert!((results[1].score - 0.8).abs() < 1e-6);
        assert!((results[2].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_zero_hops_returns_seeds_only() {
        let retriever = retriever(chain(vec![0.0, 1.0]));

        let results = retriever.rank(&[1.0, 0.0], 3, 0).unwrap();

        assert_eq!(positions(&results), vec![0]);
    }

    #[test]
    fn test_sequential_edges_only_on_first_hop() {
        let mut graph = GraphStore::new();
        let ids: Vec<NodeId> = (0..3)
            .map(|i| {
                let embedding = if i == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
                graph.add_node(passage(i, embedding)).unwrap()
            })
            .collect();
        graph.add_edge(ids[0], ids[1], EdgeKind::Sequential, 1.0).unwrap();
        graph.add_edge(ids[1], ids[2], EdgeKind::Sequential, 1.0).unwrap();
        let retriever = retriever(graph);

        let results = retriever.rank(&[1.0, 0.0], 5, 3).unwrap();

        assert_eq!(positions(&results), vec![0, 1]);
    }

    #[test]
    fn test_entities_are_traversed_not_returned() {
        let mut graph = GraphStore::new();
        let a = graph.add_node(passage(0, vec![1.0, 0.0])).unwrap();
        let d = graph.add_node(passage(7, vec![0.0, 1.0])).unwrap();
        let e = graph
            .add_node(EntityNode::new("Working memory", "CONCEPT"))
            .unwrap();
        graph.add_edge(a, e, EdgeKind::Mentions, 0.9).unwrap();
        graph.add_edge(d, e, EdgeKind::Mentions, 0.6).unwrap();
        let retriever = retriever(graph);

        let one_hop = retriever.rank(&[1.0, 0.0], 5, 1).unwrap();
        assert_eq!(positions(&one_hop), vec![0]);

        let two_hops = retriever.rank(&[1.0, 0.0], 5, 2).unwrap();
        assert_eq!(positions(&two_hops), vec![0, 7]);
        assert!((two_hops[1].score - 0.49).abs() < 1e-6);
    }

    #[test]
    fn test_results_grow_with_hop_budget() {
        let mut graph = GraphStore::new();
        let embeddings = [
            vec![1.0, 0.0],
            vec![0.9, 0.1],
            vec![0.0, 1.0],
            vec![-1.0, 0.2],
            vec![-0.5, -0.5],
            vec![0.3, -1.0],
        ];
        let ids: Vec<NodeId> = embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| graph.add_node(passage(i, e.clone())).unwrap())
            .collect();
        for i in 0..ids.len() - 1 {
            graph
                .add_edge(ids[i], ids[i + 1], EdgeKind::Sequential, 1.0)
                .unwrap();
        }
        graph.add_edge(ids[1], ids[3], EdgeKind::Similar, 0.8).unwrap();
        graph.add_edge(ids[3], ids[5], EdgeKind::Similar, 0.8).unwrap();
        graph.add_edge(ids[5], ids[4], EdgeKind::Similar, 0.8).unwrap();
        let retriever = retriever(graph);

        let mut previous: HashMap<NodeId, f32> = HashMap::new();
        for hops in 0..4 {
            let results = retriever.rank(&[1.0, 0.0], 10, hops).unwrap();
            let current: HashMap<NodeId, f32> =
                results.iter().map(|r| (r.passage.id, r.score)).collect();
            for (id, score) in &previous {
                assert!(current.get(id).copied().unwrap_or(f32::MIN) >= *score);
            }
            assert!(current.len() >= previous.len());
            previous = current;
        }
        assert_eq!(previous.len(), 6);
    }

    #[test]
    fn test_k_zero_is_invalid() {
        let retriever = retriever(chain(vec![0.0, 1.0]));
        assert!(matches!(
            retriever.rank(&[1.0, 0.0], 0, 1),
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_query_dimension_must_match() {
        let retriever = retriever(chain(vec![0.0, 1.0]));
        assert!(matches!(
            retriever.rank(&[1.0, 0.0, 0.0], 3, 1),
            Err(RagError::Graph(GraphError::DimensionMismatch {
                expected: 2,
                actual: 3
            }))
        ));
    }

    #[tokio::test]
    async fn test_empty_graph_skips_embedding() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().times(0);
        let retriever = Retriever::new(
            Arc::new(GraphStore::new()),
            Arc::new(embedder),
            RetrievalConfig::default(),
        );

        let results = retriever.retrieve("What is memory?", 5, 2).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_surfaced() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Err(ExternalError::EmbeddingUnavailable("offline".to_string())));
        let retriever = Retriever::new(
            Arc::new(chain(vec![0.0, 1.0])),
            Arc::new(embedder),
            RetrievalConfig::default(),
        );

        let err = retriever.retrieve("What is memory?", 5, 2).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::External(ExternalError::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_retrieve_embeds_query() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .withf(|text| text.contains("first passage"))
            .times(1)
            .returning(|_| Ok(vec![1.0, 0.0]));
        let retriever = Retriever::new(
            Arc::new(chain(vec![0.0, 1.0])),
            Arc::new(embedder),
            RetrievalConfig::default(),
        );

        let results = retriever.retrieve("first passage", 1, 2).await.unwrap();
        assert_eq!(positions(&results), vec![0]);
    }

    #[test]
    fn test_exact_scan_ignores_unrelated_passages() {
        let graph = chain(vec![-1.0, 0.0]);
        let seeds = ExactScan.seeds(&graph, &[1.0, 0.0], 10);

        assert_eq!(seeds, vec![(NodeId::passage("lecture.md", 0), 1.0)]);
    }

    #[test]
    fn test_retriever_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Retriever>();
    }
}
