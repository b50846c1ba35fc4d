mod converter;
mod embedding;
pub mod error;
mod extraction;
mod llm;

pub use converter::{
    convert_new_pdfs, CommandConverter, ConversionReport, ConverterConfig, DocumentConverter,
};
pub use embedding::{Embedder, EmbeddingConfig, EmbeddingEngine};
pub use error::ExternalError;
pub use extraction::{EntityExtractor, ExtractedEntity, HeuristicExtractor, OllamaExtractor};
pub use llm::{grounding_prompt, list_models, Generator, LLMConfig, LLMEngine, ModelInfo};

#[cfg(test)]
pub use embedding::MockEmbedder;
#[cfg(test)]
pub use extraction::MockEntityExtractor;
#[cfg(test)]
pub use llm::MockGenerator;

use url::Url;

/// Base URL of an Ollama service from a host (with or without scheme) and port
pub(crate) fn service_url(host: &str, port: u16) -> Result<String, ExternalError> {
    let url = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    };

    // Validate the URL
    Url::parse(&url).map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;

    Ok(url)
}
