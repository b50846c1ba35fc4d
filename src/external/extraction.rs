use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::external::{error::ExternalError, LLMConfig};
use crate::graph::normalize_label;

/// Entity mention found in a passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExternalError>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "but", "for", "in", "it", "its", "of", "on", "or", "the", "these", "this",
    "those", "to", "we", "with", "when", "while", "if", "as", "at", "by", "from", "is", "are",
    "le", "la", "les", "un", "une", "des", "du", "de", "et", "en", "dans", "pour", "par", "sur",
    "ce", "cette", "ces", "il", "elle", "ils", "elles", "nous", "vous", "on",
];

/// Offline extractor: capitalized spans and acronyms.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    pattern: Regex,
    stopwords: HashSet<&'static str>,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self, ExternalError> {
        let pattern = Regex::new(r"\b\p{Lu}[\p{L}\p{N}'’-]*(?:[ \t]+\p{Lu}[\p{L}\p{N}'’-]*)*")
            .map_err(|e| ExternalError::ConfigError(e.to_string()))?;
        Ok(Self {
            pattern,
            stopwords: STOPWORDS.iter().copied().collect(),
        })
    }

    fn classify(words: &[&str]) -> (&'static str, f32) {
        let is_acronym = words.len() == 1
            && words[0].chars().filter(|c| c.is_alphabetic()).count() >= 2
            && words[0]
                .chars()
                .filter(|c| c.is_alphabetic())
                .all(|c| c.is_uppercase());
        if is_acronym {
            ("ACRONYM", 0.7)
        } else if words.len() > 1 {
            ("PROPER_NOUN", 0.8)
        } else {
            ("PROPER_NOUN", 0.5)
        }
    }

    /// Extract entities without any network call
    pub fn extract_sync(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut found: Vec<ExtractedEntity> = Vec::new();
        let mut by_label: HashMap<String, usize> = HashMap::new();

        for span in self.pattern.find_iter(text) {
            let words: Vec<&str> = span
                .as_str()
                .split_whitespace()
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
                .skip_while(|w| self.stopwords.contains(w.to_lowercase().as_str()))
                .filter(|w| !w.is_empty())
                .collect();
            if words.is_empty() {
                continue;
            }
            let label = words.join(" ");
            if label.chars().count() < 3 {
                continue;
            }

            let (entity_type, confidence) = Self::classify(&words);
            let normalized = normalize_label(&label);
            match by_label.get(&normalized) {
                Some(&idx) => {
                    if confidence > found[idx].confidence {
                        found[idx].confidence = confidence;
                    }
                }
                None => {
                    by_label.insert(normalized, found.len());
                    found.push(ExtractedEntity {
                        label,
                        entity_type: entity_type.to_string(),
                        confidence,
                    });
                }
            }
        }

        found
    }
}

#[async_trait]
impl EntityExtractor for HeuristicExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExternalError> {
        Ok(self.extract_sync(text))
    }
}

/// Extractor backed by an Ollama chat model answering in a JSON schema
pub struct OllamaExtractor {
    endpoint: String,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct EntityResponse {
    entities: Vec<ExtractedEntity>,
}

impl OllamaExtractor {
    pub fn new(config: &LLMConfig) -> Result<Self, ExternalError> {
        Ok(Self {
            endpoint: config.get_url()?,
            model: config.model.clone(),
            client: Client::new(),
        })
    }

    fn strip_code_fence(content: &str) -> &str {
        let content = content.trim();
        content
            .strip_prefix("```json")
            .or_else(|| content.strip_prefix("```"))
            .and_then(|inner| inner.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(content)
    }

    fn parse_response(body: &str) -> Result<Vec<ExtractedEntity>, ExternalError> {
        let chat: ChatResponse = serde_json::from_str(body)
            .map_err(|e| ExternalError::ExtractionError(format!("Invalid chat response: {}", e)))?;
        let parsed: EntityResponse =
            serde_json::from_str(Self::strip_code_fence(&chat.message.content)).map_err(|e| {
                ExternalError::ExtractionError(format!("Invalid entity list: {}", e))
            })?;
        Ok(parsed.entities)
    }
}

#[async_trait]
impl EntityExtractor for OllamaExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExternalError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&serde_json::json!({
                "model": &self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You extract named entities and key concepts from course material. \
                                    Answer in JSON. Use short canonical labels and a confidence between 0 and 1."
                    },
                    {
                        "role": "user",
                        "content": format!("List the entities mentioned in this passage.\nPassage: {}", text)
                    }
                ],
                "stream": false,
                "format": {
                    "type": "object",
                    "required": ["entities"],
                    "properties": {
                        "entities": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["label", "type", "confidence"],
                                "properties": {
                                    "label": { "type": "string" },
                                    "type": { "type": "string" },
                                    "confidence": { "type": "number" }
                                }
                            }
                        }
                    }
                }
            }))
            .send()
            .await
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExternalError::ExtractionError(format!(
                "Ollama API error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;
        let entities = Self::parse_response(&body)?;
        debug!(count = entities.len(), "Entities extracted");
        Ok(entities)
    }
}
