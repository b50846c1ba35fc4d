use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a graph node.
///
/// Ids are name-based (UUID v5), so the same passage or entity always maps to
/// the same id, across builds and across graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Id of the passage at `position` in `document_id`
    pub fn passage(document_id: &str, position: usize) -> Self {
        let name = format!("passage:{}#{}", document_id, position);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Id of the entity with the given label, after normalization
    pub fn entity(label: &str) -> Self {
        let name = format!("entity:{}", normalize_label(label));
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Case-insensitive, trimmed form of an entity label with inner whitespace collapsed.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A bounded span of a converted document, with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageNode {
    pub id: NodeId,
    pub document_id: String,
    /// Index of the passage within its document
    pub position: usize,
    /// Markdown heading the passage sits under, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl PassageNode {
    pub fn new(
        document_id: impl Into<String>,
        position: usize,
        heading: Option<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let document_id = document_id.into();
        Self {
            id: NodeId::passage(&document_id, position),
            document_id,
            position,
            heading,
            text: text.into(),
            embedding,
        }
    }
}

/// A named entity mentioned by one or more passages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNode {
    pub id: NodeId,
    pub label: String,
    pub entity_type: String,
}

impl EntityNode {
    pub fn new(label: &str, entity_type: impl Into<String>) -> Self {
        Self {
            id: NodeId::entity(label),
            label: label.split_whitespace().collect::<Vec<_>>().join(" "),
            entity_type: entity_type.into(),
        }
    }

    pub fn normalized_label(&self) -> String {
        normalize_label(&self.label)
    }
}

/// Node of the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    Passage(PassageNode),
    Entity(EntityNode),
}

impl GraphNode {
    pub fn id(&self) -> NodeId {
        match self {
            GraphNode::Passage(passage) => passage.id,
            GraphNode::Entity(entity) => entity.id,
        }
    }

    pub fn as_passage(&self) -> Option<&PassageNode> {
        match self {
            GraphNode::Passage(passage) => Some(passage),
            GraphNode::Entity(_) => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityNode> {
        match self {
            GraphNode::Entity(entity) => Some(entity),
            GraphNode::Passage(_) => None,
        }
    }
}

impl From<PassageNode> for GraphNode {
    fn from(passage: PassageNode) -> Self {
        GraphNode::Passage(passage)
    }
}

impl From<EntityNode> for GraphNode {
    fn from(entity: EntityNode) -> Self {
        GraphNode::Entity(entity)
    }
}
