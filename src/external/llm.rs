use async_trait::async_trait;
use ollama_rs::{
    generation::{completion::request::GenerationRequest, options::GenerationOptions},
    Ollama,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::external::{error::ExternalError, service_url};
use crate::query::EvidenceContext;

/// Language model that answers a question from the evidence it is given
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        evidence: &EvidenceContext,
    ) -> Result<String, ExternalError>;
}

/// Prompt asking the model to answer `query` from the numbered evidence only
pub fn grounding_prompt(query: &str, evidence: &EvidenceContext) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}\n\n\
         Answer the question precisely and concisely using only the context above. \
         If the context is not sufficient to answer, say so clearly.",
        evidence.render(),
        query
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub model: String,
    pub host: String,
    pub port: u16,
    pub temperature: f32,
    pub top_p: f32,
}

impl LLMConfig {
    /// Get the full URL for the Ollama service
    pub fn get_url(&self) -> Result<String, ExternalError> {
        service_url(&self.host, self.port)
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "mistral".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// Wrapper for Ollama LLM engine
pub struct LLMEngine {
    client: Ollama,
    config: LLMConfig,
}

impl LLMEngine {
    /// Create a new LLM engine with the given configuration
    pub async fn new(config: LLMConfig) -> Result<Self, ExternalError> {
        let url = config.get_url()?;
        let url = Url::parse(&url)
            .map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;
        let host = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("localhost")
        );

        let client = Ollama::new(host, config.port);

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Generator for LLMEngine {
    async fn generate(
        &self,
        query: &str,
        evidence: &EvidenceContext,
    ) -> Result<String, ExternalError> {
        let prompt = grounding_prompt(query, evidence);
        let mut request = GenerationRequest::new(self.config.model.clone(), prompt);

        let options = GenerationOptions::default()
            .temperature(self.config.temperature)
            .top_p(self.config.top_p);

        request.options = Some(options);

        let response = self
            .client
            .generate(request)
            .await
            .map_err(|e| ExternalError::OllamaError(e.to_string()))?;

        Ok(response.response)
    }
}

/// Model installed on the Ollama service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

fn parse_tags(body: &str) -> Result<Vec<ModelInfo>, ExternalError> {
    let tags: TagsResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::OllamaError(format!("Unexpected model list: {}", e)))?;
    Ok(tags.models)
}

/// List the models available on the configured Ollama service
pub async fn list_models(config: &LLMConfig) -> Result<Vec<ModelInfo>, ExternalError> {
    let url = format!("{}/api/tags", config.get_url()?);
    let response = Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ExternalError::OllamaError(format!(
            "Failed to list models: {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ExternalError::ConnectionError(e.to_string()))?;
    parse_tags(&body)
}
