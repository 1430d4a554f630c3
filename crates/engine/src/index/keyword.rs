//! In-memory keyword index
//!
//! BM25-style term-frequency scoring over a stopword-aware tokenizer.
//! Raw scores are unbounded and not comparable to cosine similarities;
//! the retriever min-max normalizes them before fusion.

use super::KeywordIndex;
use crate::types::{ChunkKey, ChunkRecord};
use async_trait::async_trait;
use quarry_common::errors::Result;
use std::collections::HashMap;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those", "it",
    "its", "as", "do", "does", "did", "has", "have", "had", "can", "could", "will", "would",
    "should", "may", "might", "what", "how", "why", "when", "where", "who",
];

/// Tokenize text for keyword matching.
///
/// Lowercases, splits on punctuation and whitespace but preserves
/// internal hyphens, and drops stopwords - so "multi-word" stays one
/// token and "Technology Readiness Level" and "TRL" both survive as
/// searchable terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|token| token.trim_matches('-'))
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

struct IndexedChunk {
    key: ChunkKey,
    term_counts: HashMap<String, f32>,
    length: f32,
}

/// BM25 keyword index over chunk texts
pub struct InMemoryKeywordIndex {
    chunks: Vec<IndexedChunk>,
    doc_frequency: HashMap<String, f32>,
    avg_length: f32,
}

impl InMemoryKeywordIndex {
    /// Build from chunk records
    pub fn new(records: &[ChunkRecord]) -> Self {
        let mut chunks = Vec::with_capacity(records.len());
        let mut doc_frequency: HashMap<String, f32> = HashMap::new();
        let mut total_length = 0.0;

        for record in records {
            let tokens = tokenize(&record.text);
            let length = tokens.len() as f32;
            total_length += length;

            let mut term_counts: HashMap<String, f32> = HashMap::new();
            for token in tokens {
                *term_counts.entry(token).or_insert(0.0) += 1.0;
            }
            for term in term_counts.keys() {
                *doc_frequency.entry(term.clone()).or_insert(0.0) += 1.0;
            }

            chunks.push(IndexedChunk {
                key: record.key,
                term_counts,
                length,
            });
        }

        let avg_length = if chunks.is_empty() {
            0.0
        } else {
            total_length / chunks.len() as f32
        };

        Self {
            chunks,
            doc_frequency,
            avg_length,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.chunks.len() as f32;
        let df = self.doc_frequency.get(term).copied().unwrap_or(0.0);
        // Okapi idf, floored at zero for very common terms
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0)
    }

    fn score(&self, chunk: &IndexedChunk, query_tokens: &[String]) -> f32 {
        let mut score = 0.0;
        for term in query_tokens {
            let tf = match chunk.term_counts.get(term) {
                Some(tf) => *tf,
                None => continue,
            };
            let norm = 1.0 - BM25_B + BM25_B * chunk.length / self.avg_length.max(1.0);
            score += self.idf(term) * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
        }
        score
    }
}

#[async_trait]
impl KeywordIndex for InMemoryKeywordIndex {
    async fn search(&self, query_tokens: &[String], k: usize) -> Result<Vec<(ChunkKey, f32)>> {
        if self.chunks.is_empty() || query_tokens.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(ChunkKey, f32)> = self
            .chunks
            .iter()
            .map(|chunk| (chunk.key, self.score(chunk, query_tokens)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}
