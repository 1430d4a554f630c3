//! Quarry query engine
//!
//! Agentic retrieval-and-answer pipeline: queries are routed,
//! classified, rewritten into bounded variant sets, retrieved over
//! hybrid semantic + keyword indices, cross-encoder reranked, answered
//! with strict evidence grounding, and self-evaluated in a bounded
//! retry loop.
//!
//! The engine is storage-agnostic: corpora come in through the
//! [`index::CorpusProvider`] boundary, and model services through the
//! embedder, cross-encoder, and completion traits. In-memory
//! implementations of all three boundaries ship with the crate for
//! tests and embedding applications.

pub mod analyze;
pub mod evaluate;
pub mod generate;
pub mod index;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod rewrite;
pub mod router;
pub mod summarize;
pub mod types;

pub use pipeline::{CancelToken, QueryEngine};
pub use router::Route;
pub use types::{Answer, Citation, Query, Verdict};

pub use quarry_common::config::EngineConfig;
pub use quarry_common::errors::{EngineError, ErrorCode, Result};
