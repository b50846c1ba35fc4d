use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Ollama error: {0}")]
    OllamaError(String),

    #[error("Entity extraction error: {0}")]
    ExtractionError(String),

    #[error("Document conversion error: {0}")]
    ConversionError(String),
}
