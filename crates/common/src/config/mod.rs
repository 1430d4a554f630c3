//! Configuration management for the Quarry engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with QUARRY__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! The loaded value is immutable and threaded explicitly through the
//! pipeline, so pipelines with different configurations can run
//! concurrently without interference.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Query rewriting configuration
    pub rewrite: RewriteConfig,

    /// Answer evaluation configuration
    pub evaluation: EvaluationConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Cross-encoder reranking service configuration
    pub reranker: RerankerConfig,

    /// Completion service configuration
    pub completion: CompletionConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Candidates fetched per index per query variant
    #[serde(default = "default_retrieve_top_k")]
    pub retrieve_top_k: usize,

    /// Evidence kept after reranking
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,

    /// Minimal fused score a candidate must reach to count as evidence
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Reranker call timeout in seconds
    #[serde(default = "default_rerank_timeout")]
    pub rerank_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    /// Generated alternates per pass, on top of the original query
    #[serde(default = "default_max_alt_queries")]
    pub max_alt_queries: usize,

    /// Retry budget for the rewrite-retrieve-generate loop
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: usize,

    /// Whether to ask the completion service for extra paraphrases
    /// (heuristic expansion always runs regardless)
    #[serde(default = "default_llm_rewrites")]
    pub use_llm_rewrites: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// Reranker confidence required to accept an answer.
    /// A tunable default, not a universal constant - validate it against
    /// the score distribution of the reranking model in use.
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// API base URL for the embedding service
    pub api_base: Option<String>,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankerConfig {
    /// API base URL for the reranking service. Absent means reranking
    /// is skipped and evidence keeps its fused retrieval order.
    pub api_base: Option<String>,

    /// API key for the reranking service
    pub api_key: Option<String>,

    /// Cross-encoder model to use
    #[serde(default = "default_reranker_model")]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// API base URL for the completion service
    pub api_base: Option<String>,

    /// API key for the completion service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Sampling temperature. Pinned to 0 so that identical inputs
    /// against a frozen index snapshot yield identical citation sets.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_retrieve_top_k() -> usize { 20 }
fn default_rerank_top_n() -> usize { 5 }
fn default_relevance_floor() -> f32 { 0.05 }
fn default_rerank_timeout() -> u64 { 15 }
fn default_max_alt_queries() -> usize { 3 }
fn default_max_rewrites() -> usize { 2 }
fn default_llm_rewrites() -> bool { true }
fn default_accept_threshold() -> f32 { 0.7 }
fn default_embedding_model() -> String { "bge-base-en-v1.5".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 1 }
fn default_reranker_model() -> String { "bge-reranker-base".to_string() }
fn default_completion_model() -> String { "qwen2.5-7b".to_string() }
fn default_temperature() -> f32 { 0.0 }
fn default_max_tokens() -> usize { 1024 }
fn default_completion_timeout() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "quarry".to_string() }

impl EngineConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("QUARRY_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with QUARRY__ prefix
            // e.g., QUARRY__RETRIEVAL__RETRIEVE_TOP_K=30
            .add_source(
                Environment::with_prefix("QUARRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("QUARRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get reranker timeout as Duration
    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval.rerank_timeout_secs)
    }

    /// Get embedding timeout as Duration
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// Get completion timeout as Duration
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion.timeout_secs)
    }

    /// Upper bound on distinct query variants in a single retrieval pass
    pub fn max_variants(&self) -> usize {
        self.rewrite.max_alt_queries + 1
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig {
                retrieve_top_k: default_retrieve_top_k(),
                rerank_top_n: default_rerank_top_n(),
                relevance_floor: default_relevance_floor(),
                rerank_timeout_secs: default_rerank_timeout(),
            },
            rewrite: RewriteConfig {
                max_alt_queries: default_max_alt_queries(),
                max_rewrites: default_max_rewrites(),
                use_llm_rewrites: default_llm_rewrites(),
            },
            evaluation: EvaluationConfig {
                accept_threshold: default_accept_threshold(),
            },
            embedding: EmbeddingConfig {
                api_base: None,
                api_key: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_embedding_retries(),
            },
            reranker: RerankerConfig {
                api_base: None,
                api_key: None,
                model: default_reranker_model(),
            },
            completion: CompletionConfig {
                api_base: None,
                api_key: None,
                model: default_completion_model(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                timeout_secs: default_completion_timeout(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                service_name: default_service_name(),
            },
        }
    }
}
