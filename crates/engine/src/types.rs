//! Core data model for the answer pipeline
//!
//! Chunks, candidate scores, evidence, verdicts, and the final Answer
//! contract. All records here are immutable once constructed; the only
//! mutable per-query state lives in the pipeline module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a retrievable chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    /// Owning document
    pub document_id: Uuid,

    /// Position within the document
    pub chunk_index: u32,
}

impl ChunkKey {
    pub fn new(document_id: Uuid, chunk_index: u32) -> Self {
        Self {
            document_id,
            chunk_index,
        }
    }
}

/// Where a piece of evidence came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The caller's private workspace corpus
    Private,
    /// The curated shared corpus (augmentation)
    Shared,
}

/// Which retrieval signal(s) surfaced a candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSignal {
    Semantic,
    Keyword,
    Both,
}

/// Atomic retrievable unit. Owned by the ingestion subsystem;
/// the engine treats these as read-only records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk identity
    pub key: ChunkKey,

    /// Page number in the source document
    pub page: u32,

    /// Token-bounded text span
    pub text: String,

    /// Private or shared corpus
    pub provenance: Provenance,
}

/// A chunk with its fused relevance score, before reranking
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: ChunkRecord,

    /// Fused relevance in [0, 1]
    pub score: f32,

    /// Signal provenance of the score
    pub signal: RetrievalSignal,
}

/// One item of reranked evidence
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub record: ChunkRecord,

    /// Cross-encoder relevance, or the fused score when the reranker
    /// was unavailable
    pub relevance: f32,
}

/// Ordered evidence set; order is the authoritative citation order
#[derive(Debug, Clone, Default)]
pub struct RerankedEvidence {
    pub items: Vec<EvidenceItem>,

    /// Whether the cross-encoder actually scored these items
    pub reranked: bool,
}

impl RerankedEvidence {
    /// Confidence signal: relevance of the top evidence item
    pub fn top_score(&self) -> f32 {
        self.items.first().map(|i| i.relevance).unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Generator / evaluator classification of evidence sufficiency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Sufficient,
    Gap,
    Empty,
}

impl Verdict {
    /// Lenient parse for model output; falls back to scanning for a
    /// known keyword inside longer responses.
    pub fn parse(text: &str) -> Option<Self> {
        let upper = text.trim().to_uppercase();
        match upper.as_str() {
            "SUFFICIENT" => Some(Verdict::Sufficient),
            "GAP" => Some(Verdict::Gap),
            "EMPTY" => Some(Verdict::Empty),
            _ => {
                if upper.contains("SUFFICIENT") {
                    Some(Verdict::Sufficient)
                } else if upper.contains("GAP") {
                    Some(Verdict::Gap)
                } else if upper.contains("EMPTY") {
                    Some(Verdict::Empty)
                } else {
                    None
                }
            }
        }
    }
}

/// An inbound query. Immutable once accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Raw query text
    pub text: String,

    /// Originating workspace
    pub workspace_id: Uuid,

    /// Caller-selected document scope (empty = no private documents)
    pub selected_document_ids: Vec<Uuid>,

    /// Whether to union results from the shared corpus
    pub augment_shared: bool,
}

impl Query {
    pub fn new(text: impl Into<String>, workspace_id: Uuid) -> Self {
        Self {
            text: text.into(),
            workspace_id,
            selected_document_ids: Vec::new(),
            augment_shared: false,
        }
    }

    pub fn with_documents(mut self, ids: Vec<Uuid>) -> Self {
        self.selected_document_ids = ids;
        self
    }

    pub fn with_shared_corpus(mut self) -> Self {
        self.augment_shared = true;
        self
    }

    pub fn has_documents(&self) -> bool {
        !self.selected_document_ids.is_empty()
    }
}

/// Bounded, ordered set of query phrasings for one retrieval pass.
/// The unmodified original is always the first element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSet {
    queries: Vec<String>,
}

impl VariantSet {
    /// Build a variant set from the original query plus generated
    /// alternates. Duplicates of the original and of each other are
    /// dropped; the result holds at most `max_alternates + 1` entries.
    pub fn new(original: &str, alternates: Vec<String>, max_alternates: usize) -> Self {
        let mut queries = vec![original.to_string()];
        for alt in alternates {
            if queries.len() >= max_alternates + 1 {
                break;
            }
            let trimmed = alt.trim();
            if trimmed.is_empty() {
                continue;
            }
            if queries.iter().any(|q| q.eq_ignore_ascii_case(trimmed)) {
                continue;
            }
            queries.push(trimmed.to_string());
        }
        Self { queries }
    }

    /// Just the original query, no alternates
    pub fn original_only(original: &str) -> Self {
        Self {
            queries: vec![original.to_string()],
        }
    }

    pub fn original(&self) -> &str {
        &self.queries[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the original is always present
    }
}

/// A citation in the final answer. Always a subset of the evidence
/// set that produced the answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub key: ChunkKey,
    pub page: u32,
    pub excerpt: String,
    pub provenance: Provenance,
}

/// Final pipeline output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text
    pub answer: String,

    /// Reasoning trace from the generator
    pub reasoning: String,

    /// Ordered citations, following evidence order
    pub citations: Vec<Citation>,

    /// False whenever the pipeline degraded or the evaluator could not
    /// accept the answer within the retry budget
    pub confident: bool,

    /// Final evidence verdict
    pub verdict: Verdict,

    /// What the evidence was missing (populated when verdict is GAP)
    pub missing_info: String,

    /// Completion timestamp
    pub answered_at: DateTime<Utc>,
}

impl Answer {
    /// Degraded answer for structurally-empty retrieval results
    pub fn not_found() -> Self {
        Self {
            answer: "No information found in the selected sources.".to_string(),
            reasoning: String::new(),
            citations: Vec::new(),
            confident: false,
            verdict: Verdict::Empty,
            missing_info: "All retrieval attempts returned no relevant results.".to_string(),
            answered_at: Utc::now(),
        }
    }
}
