//! In-memory flat vector index
//!
//! Exact inner-product scan over L2-normalized embeddings, so scores
//! are cosine similarities. Reference implementation of the
//! `SemanticIndex` adapter; suitable for per-workspace corpora of a
//! few hundred thousand chunks.

use super::SemanticIndex;
use crate::types::ChunkKey;
use async_trait::async_trait;
use quarry_common::errors::Result;

/// Flat inner-product index
pub struct InMemoryVectorIndex {
    entries: Vec<(ChunkKey, Vec<f32>)>,
}

impl InMemoryVectorIndex {
    /// Build from pre-normalized chunk embeddings
    pub fn new(entries: Vec<(ChunkKey, Vec<f32>)>) -> Self {
        Self { entries }
    }

    fn inner_product(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

#[async_trait]
impl SemanticIndex for InMemoryVectorIndex {
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<(ChunkKey, f32)>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(ChunkKey, f32)> = self
            .entries
            .iter()
            .map(|(key, embedding)| (*key, Self::inner_product(query_vector, embedding)))
            .collect();

        // Score descending; key ascending on ties for determinism
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
