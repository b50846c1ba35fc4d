use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::external::{ConverterConfig, EmbeddingConfig, LLMConfig};

/// How entity mentions are extracted during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Off,
    Heuristic,
    Llm,
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" | "none" | "false" | "0" => Ok(ExtractionMode::Off),
            "heuristic" | "on" | "true" | "1" => Ok(ExtractionMode::Heuristic),
            "llm" | "ollama" => Ok(ExtractionMode::Llm),
            other => anyhow::bail!("Unknown entity extraction mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Directory holding the persisted graph
    pub graph_dir: PathBuf,
    pub similarity_threshold: f32,
    /// Number of most recent passages compared with each new passage
    pub candidate_window: usize,
    /// Leading embedding components used for the coarse similarity bucket
    pub bucket_bits: usize,
    pub entity_extraction: ExtractionMode,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_dir: PathBuf::from("./graph_db"),
            similarity_threshold: 0.75,
            candidate_window: 64,
            bucket_bits: 8,
            entity_extraction: ExtractionMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { max_chars: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub hop_budget: usize,
    pub decay: f32,
    /// Seeds taken per requested result
    pub seed_multiplier: usize,
    /// Neighbors followed per node during expansion
    pub max_fanout: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            hop_budget: 2,
            decay: 0.7,
            seed_multiplier: 3,
            max_fanout: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub max_concurrent_requests: usize,
    /// Retries after the first failed embedding call
    pub embed_retries: u32,
    pub retry_backoff_ms: u64,
    pub log_level: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            embed_retries: 2,
            retry_backoff_ms: 200,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub llm: LLMConfig,
    pub graph: GraphConfig,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub processing: ProcessingConfig,
    pub converter: ConverterConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = env_or("OLLAMA_PORT", 11434);

        let embedding = EmbeddingConfig {
            model: env::var("OLLAMA_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            host: host.clone(),
            port,
        };

        let llm = LLMConfig {
            model: env::var("OLLAMA_LLM_MODEL").unwrap_or_else(|_| "mistral".to_string()),
            host,
            port,
            temperature: env_or("OLLAMA_TEMPERATURE", 0.7),
            top_p: env_or("OLLAMA_TOP_P", 0.9),
        };

        let graph_defaults = GraphConfig::default();
        let entity_extraction = match env::var("ENTITY_EXTRACTION") {
            Ok(value) => value.parse()?,
            Err(_) => graph_defaults.entity_extraction,
        };
        let graph = GraphConfig {
            graph_dir: env::var("GRAPH_DIR")
                .map(PathBuf::from)
                .unwrap_or(graph_defaults.graph_dir),
            similarity_threshold: env_or(
                "SIMILARITY_THRESHOLD",
                graph_defaults.similarity_threshold,
            ),
            candidate_window: env_or("CANDIDATE_WINDOW", graph_defaults.candidate_window),
            bucket_bits: env_or("BUCKET_BITS", graph_defaults.bucket_bits),
            entity_extraction,
        };

        let chunking = ChunkConfig {
            max_chars: env_or("CHUNK_MAX_CHARS", ChunkConfig::default().max_chars),
        };

        let retrieval_defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: env_or("RETRIEVAL_TOP_K", retrieval_defaults.top_k),
            hop_budget: env_or("HOP_BUDGET", retrieval_defaults.hop_budget),
            decay: env_or("DECAY", retrieval_defaults.decay),
            seed_multiplier: env_or("SEED_MULTIPLIER", retrieval_defaults.seed_multiplier),
            max_fanout: env_or("MAX_FANOUT", retrieval_defaults.max_fanout),
        };

        let processing_defaults = ProcessingConfig::default();
        let processing = ProcessingConfig {
            max_concurrent_requests: env_or(
                "MAX_CONCURRENT_REQUESTS",
                processing_defaults.max_concurrent_requests,
            ),
            embed_retries: env_or("EMBED_RETRIES", processing_defaults.embed_retries),
            retry_backoff_ms: env_or("RETRY_BACKOFF_MS", processing_defaults.retry_backoff_ms),
            log_level: env::var("LOG_LEVEL").unwrap_or(processing_defaults.log_level),
        };

        let converter = ConverterConfig {
            command: env::var("CONVERTER_COMMAND")
                .unwrap_or_else(|_| ConverterConfig::default().command),
        };

        Ok(Self {
            embedding,
            llm,
            graph,
            chunking,
            retrieval,
            processing,
            converter,
        })
    }
}
