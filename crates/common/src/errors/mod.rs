//! Error types for the Quarry engine
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Machine-readable error codes for callers
//! - A recoverability classification driving the pipeline's
//!   absorb-and-degrade vs. surface-to-caller policy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors (1xxx)
    ValidationError,
    NoSourcesAvailable,

    // Retrieval errors (2xxx)
    EmbeddingError,
    EmbeddingTimeout,
    IndexUnavailable,
    EmptyEvidence,

    // Model-service errors (3xxx)
    RerankerError,
    CompletionError,
    CompletionTimeout,
    MalformedOutput,

    // Lifecycle errors (4xxx)
    Canceled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Request (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::NoSourcesAvailable => 1002,

            // Retrieval (2xxx)
            ErrorCode::EmbeddingError => 2001,
            ErrorCode::EmbeddingTimeout => 2002,
            ErrorCode::IndexUnavailable => 2003,
            ErrorCode::EmptyEvidence => 2004,

            // Model services (3xxx)
            ErrorCode::RerankerError => 3001,
            ErrorCode::CompletionError => 3002,
            ErrorCode::CompletionTimeout => 3003,
            ErrorCode::MalformedOutput => 3004,

            // Lifecycle (4xxx)
            ErrorCode::Canceled => 4001,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    // Request errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("No sources available: no documents selected and shared-corpus augmentation is off")]
    NoSourcesAvailable,

    // Retrieval errors
    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("No evidence above the relevance floor")]
    EmptyEvidence,

    // Model-service errors
    #[error("Reranker error: {message}")]
    Reranker { message: String },

    #[error("Completion service error: {message}")]
    Completion { message: String },

    #[error("Completion timeout after {timeout_ms}ms")]
    CompletionTimeout { timeout_ms: u64 },

    #[error("Malformed generator output: {message}")]
    MalformedOutput { message: String },

    // Lifecycle errors
    #[error("Pipeline canceled by caller")]
    Canceled,

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation { .. } => ErrorCode::ValidationError,
            EngineError::NoSourcesAvailable => ErrorCode::NoSourcesAvailable,
            EngineError::Embedding { .. } => ErrorCode::EmbeddingError,
            EngineError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            EngineError::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            EngineError::EmptyEvidence => ErrorCode::EmptyEvidence,
            EngineError::Reranker { .. } => ErrorCode::RerankerError,
            EngineError::Completion { .. } => ErrorCode::CompletionError,
            EngineError::CompletionTimeout { .. } => ErrorCode::CompletionTimeout,
            EngineError::MalformedOutput { .. } => ErrorCode::MalformedOutput,
            EngineError::Canceled => ErrorCode::Canceled,
            EngineError::Internal { .. } => ErrorCode::InternalError,
            EngineError::Configuration { .. } => ErrorCode::ConfigurationError,
            EngineError::Serialization(_) => ErrorCode::SerializationError,
            EngineError::HttpClient(_) => ErrorCode::InternalError,
            EngineError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the pipeline may absorb this error and continue with a
    /// degraded (confident = false) answer instead of failing the request.
    ///
    /// Failures that make answering structurally impossible (no sources,
    /// no indices, cancellation) are not degradable.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            EngineError::Embedding { .. }
                | EngineError::EmbeddingTimeout { .. }
                | EngineError::EmptyEvidence
                | EngineError::Reranker { .. }
                | EngineError::Completion { .. }
                | EngineError::CompletionTimeout { .. }
                | EngineError::MalformedOutput { .. }
        )
    }

    /// Whether a single bounded retry is worthwhile before degrading
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Embedding { .. }
                | EngineError::EmbeddingTimeout { .. }
                | EngineError::IndexUnavailable { .. }
                | EngineError::Completion { .. }
                | EngineError::CompletionTimeout { .. }
        )
    }
}

/// Structured error payload surfaced to callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&EngineError> for ErrorDetails {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            details: None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}
