use async_trait::async_trait;
use ollama_rs::{generation::options::GenerationOptions, Ollama};
use serde::{Deserialize, Serialize};
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::external::{error::ExternalError, service_url};

/// Source of fixed-length embedding vectors for text spans
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`; fails with [`ExternalError::EmbeddingUnavailable`] when the provider fails
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub host: String,
    pub port: u16,
}

impl EmbeddingConfig {
    /// Get the full URL for the Ollama service
    pub fn get_url(&self) -> Result<String, ExternalError> {
        service_url(&self.host, self.port)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

/// Wrapper for Ollama embedding engine
pub struct EmbeddingEngine {
    client: Ollama,
    config: EmbeddingConfig,
}

impl EmbeddingEngine {
    /// Create a new embedding engine with the given configuration
    pub async fn new(config: EmbeddingConfig) -> Result<Self, ExternalError> {
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

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl Embedder for EmbeddingEngine {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        let response = self
            .client
            .generate_embeddings(
                self.config.model.clone(),
                text.to_string(),
                Some(GenerationOptions::default()),
            )
            .await
            .map_err(|e| ExternalError::EmbeddingUnavailable(e.to_string()))?;

        to_embedding(&self.config.model, response.embeddings)
    }
}

/// Narrow a provider vector to `f32`, rejecting empty or non-finite output
fn to_embedding(model: &str, values: Vec<f64>) -> Result<Vec<f32>, ExternalError> {
    if values.is_empty() {
        return Err(ExternalError::EmbeddingUnavailable(format!(
            "model {} returned an empty embedding",
            model
        )));
    }

    let embedding: Vec<f32> = values.into_iter().map(|x| x as f32).collect();
    if !embedding.iter().all(|x| x.is_finite()) {
        return Err(ExternalError::EmbeddingUnavailable(format!(
            "model {} returned non-finite values",
            model
        )));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_generation() {
        // Test with plain hostname
        let config = EmbeddingConfig {
            host: "localhost".to_string(),
            port: 11434,
            model: "test".to_string(),
        };
        assert_eq!(config.get_url().unwrap(), "http://localhost:11434");

        // Test with https:// prefix
        let config = EmbeddingConfig {
            host: "https://example.com/".to_string(),
            port: 11434,
            model: "test".to_string(),
        };
        assert_eq!(config.get_url().unwrap(), "https://example.com:11434");

        let config = EmbeddingConfig {
            host: "http://exa mple.com".to_string(),
            port: 11434,
            model: "test".to_string(),
        };
        assert!(matches!(config.get_url(), Err(ExternalError::ConfigError(_))));
    }

    #[test]
    fn test_provider_vector_conversion() {
        assert_eq!(
            to_embedding("nomic", vec![0.5, -0.25, 1.0]).unwrap(),
            vec![0.5f32, -0.25, 1.0]
        );

        assert!(matches!(
            to_embedding("nomic", Vec::new()),
            Err(ExternalError::EmbeddingUnavailable(_))
        ));
        // f64 values beyond f32 range turn into infinity when narrowed
        for values in [vec![0.1, f64::NAN], vec![1e300, 0.1]] {
            let err = to_embedding("nomic", values).unwrap_err();
            assert!(err.to_string().contains("non-finite"));
        }
    }
}
