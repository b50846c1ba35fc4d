use async_trait::async_trait;
use graph_rag::config::{GraphConfig, ProcessingConfig, RetrievalConfig};
use graph_rag::external::{Embedder, ExternalError};
use graph_rag::graph::GRAPH_FILE_NAME;
use graph_rag::{
    CancelFlag, Chunker, Document, EdgeKind, GraphBuilder, GraphError, GraphRepository,
    GraphStore, NodeId, RagError, Retriever,
};
use mockall::mock;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mock! {
    pub Embedder {}

    #[async_trait]
    impl Embedder for Embedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalError>;
    }
}

fn processing() -> ProcessingConfig {
    ProcessingConfig {
        retry_backoff_ms: 1,
        ..ProcessingConfig::default()
    }
}

/// Deterministic embedder: topic keywords map to fixed directions
fn topic_embedder() -> MockEmbedder {
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed().returning(|text| {
        let text = text.to_lowercase();
        let mut embedding = vec![0.05, 0.05, 0.05, 0.05];
        for (i, topic) in ["memory", "attention", "perception", "language"]
            .iter()
            .enumerate()
        {
            if text.contains(topic) {
                embedding[i] += 1.0;
            }
        }
        Ok(embedding)
    });
    embedder
}

fn builder(embedder: MockEmbedder) -> GraphBuilder {
    GraphBuilder::new(
        Chunker::new(200),
        Arc::new(embedder),
        GraphConfig::default(),
        processing(),
    )
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "memory.md",
            "# Memory\nWorking memory holds items briefly.\n\n\
             # Rehearsal\nRehearsal keeps memory traces active.\n\n\
             # Attention\nAttention filters what enters memory.",
        ),
        Document::new(
            "perception.md",
            "# Perception\nPerception organises sensory input.\n\n\
             # Language\nLanguage comprehension relies on perception and memory.",
        ),
    ]
}

#[tokio::test]
async fn test_embedding_retried_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed().times(3).returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ExternalError::EmbeddingUnavailable("busy".to_string()))
        } else {
            Ok(vec![1.0, 0.0])
        }
    });

    let mut graph = GraphStore::new();
    let report = builder(embedder)
        .build(
            &mut graph,
            &[Document::new("notes.md", "A single passage.")],
            &CancelFlag::new(),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(report.skipped.is_empty());
    assert_eq!(report.passages_added, 1);
    assert!(graph.contains(&NodeId::passage("notes.md", 0)));
}

#[tokio::test]
async fn test_empty_corpus_retrieves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let repository = GraphRepository::open(dir.path()).unwrap();

    let mut session = repository.begin_session().await;
    let report = builder(topic_embedder())
        .build(session.graph_mut(), &[], &CancelFlag::new())
        .await
        .unwrap();
    let graph = session.commit().unwrap();
    assert_eq!(report.chunks, 0);
    assert!(dir.path().join(GRAPH_FILE_NAME).exists());

    let mut query_embedder = MockEmbedder::new();
    query_embedder.expect_embed().times(0);
    let retriever = Retriever::new(graph, Arc::new(query_embedder), RetrievalConfig::default());

    let results = retriever.retrieve("What is memory?", 5, 2).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_build_commit_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let repository = GraphRepository::open(dir.path()).unwrap();

    let mut session = repository.begin_session().await;
    let report = builder(topic_embedder())
        .build(session.graph_mut(), &corpus(), &CancelFlag::new())
        .await
        .unwrap();
    session.commit().unwrap();
    assert_eq!(report.passages_added, 5);
    assert!(report.is_clean());

    // Reopen from disk to read what was persisted
    let reopened = GraphRepository::open(dir.path()).unwrap();
    let graph = reopened.snapshot();
    assert_eq!(graph.passages().count(), 5);
    for edge in graph.edges() {
        assert!(graph.contains(&edge.source));
        assert!(graph.contains(&edge.target));
    }
    assert!(graph.contains_edge(
        NodeId::passage("memory.md", 0),
        NodeId::passage("memory.md", 1),
        EdgeKind::Sequential
    ));

    let retriever = Retriever::new(graph, Arc::new(topic_embedder()), RetrievalConfig::default());
    let results = retriever
        .retrieve("How does perception work?", 3, 2)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].passage.text.to_lowercase().contains("perception"));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_same_corpus_builds_identical_graphs() {
    let mut first = GraphStore::new();
    let mut second = GraphStore::new();

    builder(topic_embedder())
        .build(&mut first, &corpus(), &CancelFlag::new())
        .await
        .unwrap();
    builder(topic_embedder())
        .build(&mut second, &corpus(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(first.serialize().unwrap(), second.serialize().unwrap());
}

#[tokio::test]
async fn test_cancelled_build_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let repository = GraphRepository::open(dir.path()).unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let mut session = repository.begin_session().await;
    let result = builder(topic_embedder())
        .build(session.graph_mut(), &corpus(), &cancel)
        .await;
    assert!(matches!(result, Err(RagError::Cancelled)));
    drop(session);

    assert!(repository.snapshot().is_empty());
    assert!(!dir.path().join(GRAPH_FILE_NAME).exists());
}

#[tokio::test]
async fn test_corrupt_file_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let repository = GraphRepository::open(dir.path()).unwrap();

    let mut session = repository.begin_session().await;
    builder(topic_embedder())
        .build(session.graph_mut(), &corpus(), &CancelFlag::new())
        .await
        .unwrap();
    let committed = session.commit().unwrap();

    // Point the last edge at a passage that does not exist
    let path = dir.path().join(GRAPH_FILE_NAME);
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let last = lines.pop().unwrap();
    let edge = committed.edges().last().unwrap();
    let dangling = NodeId::passage("ghost.md", 99).to_string();
    lines.push(last.replace(&edge.target.to_string(), &dangling));
    fs::write(&path, lines.join("\n")).unwrap();

    let err = repository.reload().unwrap_err();
    assert!(matches!(err, GraphError::CorruptGraph(_)));
    assert_eq!(repository.snapshot().node_count(), committed.node_count());
    assert!(GraphRepository::open(dir.path()).is_err());
}
