//! Quarry Common Library
//!
//! Shared code for the Quarry engine including:
//! - Error types and handling
//! - Configuration management
//! - Embedding client abstraction
//! - Completion client abstraction
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::EngineConfig;
pub use embeddings::Embedder;
pub use errors::{EngineError, Result};
pub use llm::CompletionClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
