//! Score fusion for combining semantic and keyword results
//!
//! Weighted-sum fusion over normalized scores. Keyword scores are
//! min-max scaled to [0,1] over the returned set first, since raw
//! term-frequency scores are unbounded and not comparable to cosine
//! similarities.

use crate::analyze::QueryClass;
use crate::types::{ChunkKey, RetrievalSignal};
use std::collections::HashMap;

/// Fusion weight profile. Weights always sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl FusionWeights {
    /// Weight profile for an analyzer class.
    ///
    /// Lookup-style queries favor exact terminology (keyword-heavy);
    /// multi-hop, numeric, and comparison queries favor paraphrase
    /// robustness (semantic-heavy).
    pub fn for_class(class: QueryClass) -> Self {
        match class {
            QueryClass::Lookup => Self {
                semantic: 0.4,
                keyword: 0.6,
            },
            QueryClass::MultiHop | QueryClass::Numeric | QueryClass::Comparison => Self {
                semantic: 0.8,
                keyword: 0.2,
            },
        }
    }

    /// Reassign weights when one index returned nothing for a variant.
    /// The empty side's weight moves entirely to the other side so the
    /// fused score is not diluted by a zero term.
    pub fn reassign(self, has_semantic: bool, has_keyword: bool) -> Self {
        match (has_semantic, has_keyword) {
            (true, false) => Self {
                semantic: 1.0,
                keyword: 0.0,
            },
            (false, true) => Self {
                semantic: 0.0,
                keyword: 1.0,
            },
            _ => self,
        }
    }

    pub fn sum(&self) -> f32 {
        self.semantic + self.keyword
    }
}

/// One fused candidate score, tagged with signal provenance
#[derive(Debug, Clone, Copy)]
pub struct FusedScore {
    pub key: ChunkKey,
    pub score: f32,
    pub signal: RetrievalSignal,
}

/// Min-max scale raw keyword scores to [0, 1] over the returned set.
/// A single-element or constant set maps to 1.0.
fn min_max_normalize(results: &[(ChunkKey, f32)]) -> Vec<(ChunkKey, f32)> {
    let (min, max) = results.iter().fold((f32::MAX, f32::MIN), |(lo, hi), (_, s)| {
        (lo.min(*s), hi.max(*s))
    });
    let range = max - min;

    results
        .iter()
        .map(|(key, score)| {
            let normalized = if range > f32::EPSILON {
                (score - min) / range
            } else {
                1.0
            };
            (*key, normalized)
        })
        .collect()
}

/// Fuse one variant's semantic and keyword result lists into a single
/// scored candidate set.
///
/// Semantic similarities are clamped to [0, 1]; keyword scores are
/// min-max normalized; the fused score is the weight-blended sum and
/// therefore stays in [0, 1].
pub fn fuse(
    semantic_results: &[(ChunkKey, f32)],
    keyword_results: &[(ChunkKey, f32)],
    weights: FusionWeights,
) -> Vec<FusedScore> {
    let weights = weights.reassign(!semantic_results.is_empty(), !keyword_results.is_empty());
    debug_assert!((weights.sum() - 1.0).abs() < 1e-6);

    let keyword_normalized = min_max_normalize(keyword_results);

    let mut merged: HashMap<ChunkKey, (Option<f32>, Option<f32>)> = HashMap::new();
    for (key, score) in semantic_results {
        merged.entry(*key).or_insert((None, None)).0 = Some(score.clamp(0.0, 1.0));
    }
    for (key, score) in &keyword_normalized {
        merged.entry(*key).or_insert((None, None)).1 = Some(*score);
    }

    merged
        .into_iter()
        .map(|(key, (semantic, keyword))| {
            let signal = match (semantic.is_some(), keyword.is_some()) {
                (true, true) => RetrievalSignal::Both,
                (true, false) => RetrievalSignal::Semantic,
                _ => RetrievalSignal::Keyword,
            };
            let score = weights.semantic * semantic.unwrap_or(0.0)
                + weights.keyword * keyword.unwrap_or(0.0);
            FusedScore { key, score, signal }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn key(idx: u32) -> ChunkKey {
        ChunkKey::new(Uuid::from_u128(1), idx)
    }

    #[test]
    fn test_weights_sum_to_one_for_every_class() {
        for class in [
            QueryClass::Lookup,
            QueryClass::MultiHop,
            QueryClass::Numeric,
            QueryClass::Comparison,
        ] {
            let weights = FusionWeights::for_class(class);
            assert!(
                (weights.sum() - 1.0).abs() < 1e-6,
                "weights for {:?} must sum to 1.0",
                class
            );
        }
    }

    #[test]
    fn test_lookup_favors_keyword() {
        let weights = FusionWeights::for_class(QueryClass::Lookup);
        assert!(weights.keyword > weights.semantic);

        let weights = FusionWeights::for_class(QueryClass::MultiHop);
        assert!(weights.semantic > weights.keyword);
    }

    #[test]
    fn test_fuse_blends_both_signals() {
        let semantic = vec![(key(0), 0.9), (key(1), 0.5)];
        let keyword = vec![(key(1), 10.0), (key(2), 2.0)];

        let fused = fuse(&semantic, &keyword, FusionWeights::for_class(QueryClass::Lookup));
        let by_key: HashMap<ChunkKey, FusedScore> =
            fused.into_iter().map(|f| (f.key, f)).collect();

        assert_eq!(by_key[&key(0)].signal, RetrievalSignal::Semantic);
        assert_eq!(by_key[&key(1)].signal, RetrievalSignal::Both);
        assert_eq!(by_key[&key(2)].signal, RetrievalSignal::Keyword);

        // key(1): 0.4 * 0.5 + 0.6 * 1.0 (max of keyword set)
        assert!((by_key[&key(1)].score - 0.8).abs() < 1e-6);
        // key(2): 0.6 * 0.0 (min of keyword set)
        assert!(by_key[&key(2)].score.abs() < 1e-6);

        // All fused scores stay in [0, 1]
        assert!(by_key.values().all(|f| (0.0..=1.0).contains(&f.score)));
    }

    #[test]
    fn test_weight_reassignment_when_keyword_empty() {
        let semantic = vec![(key(0), 0.5)];
        let fused = fuse(&semantic, &[], FusionWeights::for_class(QueryClass::Lookup));

        // Full weight goes to the semantic side: score is 0.5, not 0.2
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.5).abs() < 1e-6);
        assert_eq!(fused[0].signal, RetrievalSignal::Semantic);
    }

    #[test]
    fn test_weight_reassignment_when_semantic_empty() {
        let keyword = vec![(key(0), 4.0), (key(1), 2.0)];
        let fused = fuse(&[], &keyword, FusionWeights::for_class(QueryClass::MultiHop));

        let top = fused.iter().find(|f| f.key == key(0)).unwrap();
        assert!((top.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_keyword_scores_normalize_to_one() {
        let keyword = vec![(key(0), 3.0), (key(1), 3.0)];
        let fused = fuse(&[], &keyword, FusionWeights::for_class(QueryClass::Lookup));
        assert!(fused.iter().all(|f| (f.score - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_negative_cosine_clamped() {
        let semantic = vec![(key(0), -0.2)];
        let fused = fuse(&semantic, &[], FusionWeights::for_class(QueryClass::MultiHop));
        assert_eq!(fused[0].score, 0.0);
    }
}
