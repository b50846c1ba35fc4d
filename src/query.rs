use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info};

use crate::corpus::Document;
use crate::error::RagError;
use crate::external::Generator;
use crate::retriever::{Retriever, ScoredPassage};

/// A retrieved passage with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub document_id: String,
    pub position: usize,
    pub heading: Option<String>,
    pub score: f32,
    pub text: String,
}

impl From<ScoredPassage> for EvidenceItem {
    fn from(scored: ScoredPassage) -> Self {
        Self {
            document_id: scored.passage.document_id,
            position: scored.passage.position,
            heading: scored.passage.heading,
            score: scored.score,
            text: scored.passage.text,
        }
    }
}

/// Evidence gathered for one question, best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceContext {
    pub query: String,
    pub items: Vec<EvidenceItem>,
}

impl EvidenceContext {
    /// Whole markdown documents as unranked evidence, in the given order.
    ///
    /// Other documents and blank ones are left out. Every item scores 1.0.
    pub fn from_documents(query: &str, documents: &[Document]) -> Self {
        let items = documents
            .iter()
            .filter(|doc| doc.is_markdown() && !doc.content.trim().is_empty())
            .map(|doc| EvidenceItem {
                document_id: doc.id.clone(),
                position: 0,
                heading: None,
                score: 1.0,
                text: doc.content.trim().to_string(),
            })
            .collect();

        Self {
            query: query.to_string(),
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Numbered passages with their source
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(out, "[{}] {}#{}", i + 1, item.document_id, item.position);
            if let Some(heading) = &item.heading {
                let _ = write!(out, " ({})", heading);
            }
            let _ = write!(out, "\n{}", item.text);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    /// `None` when no evidence was found and the generator was not called
    pub answer: Option<String>,
    pub evidence: EvidenceContext,
}

/// Retrieval followed by grounded generation
pub struct QueryEngine {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl QueryEngine {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Retrieve evidence with the configured `top_k` and hop budget
    pub async fn evidence(&self, query: &str) -> Result<EvidenceContext, RagError> {
        let config = self.retriever.config();
        let passages = self
            .retriever
            .retrieve(query, config.top_k, config.hop_budget)
            .await?;
        debug!(passages = passages.len(), "Evidence retrieved");

        Ok(EvidenceContext {
            query: query.to_string(),
            items: passages.into_iter().map(EvidenceItem::from).collect(),
        })
    }

    pub async fn answer(&self, query: &str) -> Result<QueryResponse, RagError> {
        let evidence = self.evidence(query).await?;
        if evidence.is_empty() {
            info!("No relevant passages found, skipping generation");
        }
        answer_with_evidence(self.generator.as_ref(), evidence).await
    }
}

/// Answer from evidence gathered elsewhere.
///
/// Empty evidence yields `answer: None` without calling the generator.
pub async fn answer_with_evidence(
    generator: &dyn Generator,
    evidence: EvidenceContext,
) -> Result<QueryResponse, RagError> {
    if evidence.is_empty() {
        return Ok(QueryResponse {
            answer: None,
            evidence,
        });
    }

    let answer = generator.generate(&evidence.query, &evidence).await?;
    Ok(QueryResponse {
        answer: Some(answer.trim().to_string()),
        evidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::external::{ExternalError, MockEmbedder, MockGenerator};
    use crate::graph::{EdgeKind, GraphStore, PassageNode};

    fn graph() -> GraphStore {
        let mut graph = GraphStore::new();
        let a = graph
            .add_node(PassageNode::new(
                "memory.md",
                0,
                Some("Working memory".to_string()),
                "Working memory holds a few items for seconds.",
                vec![1.0, 0.0],
            ))
            .unwrap();
        let b = graph
            .add_node(PassageNode::new(
                "memory.md",
                1,
                None,
                "Rehearsal keeps items active.",
                vec![0.0, 1.0],
            ))
            .unwrap();
        graph.add_edge(a, b, EdgeKind::Sequential, 1.0).unwrap();
        graph
    }

    fn engine(graph: GraphStore, generator: MockGenerator) -> QueryEngine {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        let retriever = Retriever::new(
            Arc::new(graph),
            Arc::new(embedder),
            RetrievalConfig::default(),
        );
        QueryEngine::new(retriever, Arc::new(generator))
    }

    #[tokio::test]
    async fn test_answer_with_evidence() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(|query, evidence| {
                query.contains("How long does working memory last?")
                    && evidence.query.contains("How long does working memory last?")
                    && evidence.items.len() == 2
                    && evidence.items[0].heading.as_deref() == Some("Working memory")
                    && evidence.items[1].text.contains("Rehearsal keeps items active.")
            })
            .times(1)
            .returning(|_, _| Ok(" A few seconds.\n".to_string()));

        let response = engine(graph(), generator)
            .answer("How long does working memory last?")
            .await
            .unwrap();

        assert_eq!(response.answer.as_deref(), Some("A few seconds."));
        assert_eq!(response.evidence.items.len(), 2);
        assert_eq!(response.evidence.items[0].position, 0);
        assert!((response.evidence.items[1].score - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_evidence_skips_generation() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().times(0);

        let response = engine(GraphStore::new(), generator)
            .answer("Anything?")
            .await
            .unwrap();

        assert!(response.answer.is_none());
        assert!(response.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_is_surfaced() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Err(ExternalError::OllamaError("model not found".to_string())));

        let err = engine(graph(), generator)
            .answer("What is rehearsal?")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::External(ExternalError::OllamaError(_))));
    }

    #[tokio::test]
    async fn test_answer_from_markdown_documents() {
        let documents = vec![
            Document::new("notes.txt", "Plain notes."),
            Document::new("week1.md", "# Memory\n\nWorking memory is brief.\n"),
            Document::new("empty.md", "  \n"),
            Document::new("week2/attention.markdown", "Attention filters input."),
        ];
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(|_, evidence| evidence.items.len() == 2)
            .times(1)
            .returning(|_, _| Ok("Briefly.".to_string()));

        let evidence = EvidenceContext::from_documents("How long?", &documents);
        let response = answer_with_evidence(&generator, evidence).await.unwrap();

        assert_eq!(response.answer.as_deref(), Some("Briefly."));
        let ids: Vec<&str> = response
            .evidence
            .items
            .iter()
            .map(|item| item.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["week1.md", "week2/attention.markdown"]);
        assert_eq!(response.evidence.items[0].text, "# Memory\n\nWorking memory is brief.");
        assert!(response.evidence.render().starts_with("[1] week1.md#0\n# Memory"));
    }

    #[tokio::test]
    async fn test_no_markdown_documents_skips_generation() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().times(0);

        let evidence =
            EvidenceContext::from_documents("Anything?", &[Document::new("a.txt", "Text.")]);
        let response = answer_with_evidence(&generator, evidence).await.unwrap();

        assert!(response.answer.is_none());
    }

    #[test]
    fn test_render_without_heading() {
        let context = EvidenceContext {
            query: "q".to_string(),
            items: vec![EvidenceItem {
                document_id: "a.md".to_string(),
                position: 3,
                heading: None,
                score: 0.5,
                text: "Text.".to_string(),
            }],
        };
        assert_eq!(context.render(), "[1] a.md#3\nText.");
    }
}
