//! Hybrid retrieval
//!
//! For each query variant, runs the semantic and keyword lookups
//! concurrently, fuses their scores per variant, then merges all
//! variants into one deduplicated candidate set filtered to the
//! caller's document scope. Shared-corpus results are unioned in with
//! distinct provenance when augmentation is enabled.

mod fusion;

pub use fusion::{fuse, FusedScore, FusionWeights};

use crate::analyze::QueryClass;
use crate::index::{tokenize, CorpusSnapshot};
use crate::types::{Candidate, ChunkKey, Provenance, RetrievalSignal, VariantSet};
use quarry_common::embeddings::Embedder;
use quarry_common::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Result of one retrieval pass
#[derive(Debug, Default)]
pub struct RetrievalOutput {
    /// Fused candidates above the relevance floor, deduplicated by
    /// chunk key, ordered score-descending (private before shared on
    /// ties)
    pub candidates: Vec<Candidate>,

    /// True when one retrieval signal was unavailable and the pass ran
    /// on the other alone; the final answer must not claim full
    /// confidence
    pub degraded: bool,
}

/// Hybrid semantic + keyword retriever
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    relevance_floor: f32,
}

struct VariantPass {
    fused: Vec<FusedScore>,
    semantic_failed: bool,
    keyword_failed: bool,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize, relevance_floor: f32) -> Self {
        Self {
            embedder,
            top_k,
            relevance_floor,
        }
    }

    /// Run one retrieval pass over the given corpora.
    ///
    /// `scope` narrows private results to the caller-selected
    /// documents; shared-corpus results always pass the filter.
    pub async fn retrieve(
        &self,
        variants: &VariantSet,
        class: QueryClass,
        scope: &[Uuid],
        workspace: Option<&CorpusSnapshot>,
        shared: Option<&CorpusSnapshot>,
    ) -> Result<RetrievalOutput> {
        let weights = FusionWeights::for_class(class);

        // One embedding batch covers every variant; per-variant index
        // lookups reuse it. A failed batch (after the client's own
        // retry) degrades the pass to keyword-only.
        let variant_texts: Vec<String> = variants.iter().map(|v| v.to_string()).collect();
        let embeddings = match self.embedder.embed_batch(&variant_texts).await {
            Ok(embeddings) => Some(embeddings),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, degrading to keyword-only retrieval");
                None
            }
        };

        let mut semantic_failed = embeddings.is_none();
        let mut keyword_failed = false;
        let mut any_semantic_ok = false;
        let mut any_keyword_ok = false;

        // (score, signal, provenance) per chunk key, keeping the max
        // fused score seen across variants and corpora
        let mut merged: HashMap<ChunkKey, (f32, RetrievalSignal, Provenance)> = HashMap::new();

        let corpora: Vec<(&CorpusSnapshot, Provenance)> = workspace
            .map(|c| (c, Provenance::Private))
            .into_iter()
            .chain(shared.map(|c| (c, Provenance::Shared)))
            .collect();

        for (corpus, provenance) in &corpora {
            // Fan out the per-variant lookups; each variant runs its
            // two index lookups concurrently as well
            let passes = futures::future::join_all(variant_texts.iter().enumerate().map(
                |(i, text)| {
                    let embedding = embeddings.as_ref().map(|e| e[i].as_slice());
                    self.search_variant(corpus, text, embedding, weights)
                },
            ))
            .await;

            for pass in passes {
                semantic_failed |= pass.semantic_failed;
                keyword_failed |= pass.keyword_failed;
                any_semantic_ok |= !pass.semantic_failed && embeddings.is_some();
                any_keyword_ok |= !pass.keyword_failed;

                for fused in pass.fused {
                    match merged.get_mut(&fused.key) {
                        Some(existing) => {
                            if fused.score > existing.0 {
                                existing.0 = fused.score;
                                existing.1 = fused.signal;
                            }
                        }
                        None => {
                            merged.insert(fused.key, (fused.score, fused.signal, *provenance));
                        }
                    }
                }
            }
        }

        // Both signals down means retrieval is structurally impossible
        if semantic_failed && keyword_failed && !any_semantic_ok && !any_keyword_ok {
            return Err(EngineError::IndexUnavailable {
                message: "both semantic and keyword lookups failed".to_string(),
            });
        }

        let candidates = self
            .resolve_candidates(merged, scope, &corpora)
            .await?;

        quarry_common::metrics::record_candidates(candidates.len());
        tracing::debug!(
            candidates = candidates.len(),
            variants = variants.len(),
            degraded = semantic_failed || keyword_failed,
            "Retrieval pass complete"
        );

        Ok(RetrievalOutput {
            candidates,
            degraded: semantic_failed || keyword_failed,
        })
    }

    async fn search_variant(
        &self,
        corpus: &CorpusSnapshot,
        text: &str,
        embedding: Option<&[f32]>,
        weights: FusionWeights,
    ) -> VariantPass {
        let tokens = tokenize(text);

        let semantic_fut = async {
            match embedding {
                Some(vector) => corpus.semantic.search(vector, self.top_k).await,
                None => Ok(vec![]),
            }
        };
        let keyword_fut = corpus.keyword.search(&tokens, self.top_k);

        let (semantic, keyword) = tokio::join!(semantic_fut, keyword_fut);

        let (semantic, semantic_failed) = match semantic {
            Ok(results) => (results, false),
            Err(e) => {
                tracing::warn!(error = %e, variant = text, "Semantic lookup failed");
                (vec![], true)
            }
        };
        let (keyword, keyword_failed) = match keyword {
            Ok(results) => (results, false),
            Err(e) => {
                tracing::warn!(error = %e, variant = text, "Keyword lookup failed");
                (vec![], true)
            }
        };

        VariantPass {
            fused: fuse(&semantic, &keyword, weights),
            semantic_failed,
            keyword_failed,
        }
    }

    /// Apply scope filtering and the relevance floor, resolve chunk
    /// records, and order the final candidate set.
    async fn resolve_candidates(
        &self,
        merged: HashMap<ChunkKey, (f32, RetrievalSignal, Provenance)>,
        scope: &[Uuid],
        corpora: &[(&CorpusSnapshot, Provenance)],
    ) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::with_capacity(merged.len());

        for (key, (score, signal, provenance)) in merged {
            if score < self.relevance_floor {
                continue;
            }
            // Scope narrows private results only; shared results are
            // part of the pass by explicit augmentation
            if provenance == Provenance::Private
                && !scope.is_empty()
                && !scope.contains(&key.document_id)
            {
                continue;
            }

            let store = corpora
                .iter()
                .find(|(_, p)| *p == provenance)
                .map(|(c, _)| &c.store);
            let Some(store) = store else { continue };

            match store.get(key).await? {
                Some(mut record) => {
                    record.provenance = provenance;
                    candidates.push(Candidate {
                        record,
                        score,
                        signal,
                    });
                }
                None => {
                    tracing::warn!(?key, "Indexed chunk missing from store, skipping");
                }
            }
        }

        // Score descending; private ranked ahead of shared on ties;
        // key order last for determinism
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match (a.record.provenance, b.record.provenance) {
                    (Provenance::Private, Provenance::Shared) => std::cmp::Ordering::Less,
                    (Provenance::Shared, Provenance::Private) => std::cmp::Ordering::Greater,
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.record.key.cmp(&b.record.key))
        });

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{
        InMemoryChunkStore, InMemoryKeywordIndex, InMemoryVectorIndex, KeywordIndex,
        SemanticIndex,
    };
    use crate::types::ChunkRecord;
    use async_trait::async_trait;
    use quarry_common::embeddings::l2_normalize;

    fn record(doc: u128, idx: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            key: ChunkKey::new(Uuid::from_u128(doc), idx),
            page: idx + 1,
            text: text.to_string(),
            provenance: Provenance::Private,
        }
    }

    fn axis(dim: usize, at: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[at] = 1.0;
        l2_normalize(&mut v);
        v
    }

    /// Embedder that maps known phrases to fixed axes, deterministic
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> quarry_common::errors::Result<Vec<f32>> {
            let axis_idx = if text.contains("thermal") { 0 } else { 1 };
            Ok(axis(4, axis_idx))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> quarry_common::errors::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    struct FailingSemantic;

    #[async_trait]
    impl SemanticIndex for FailingSemantic {
        async fn search(
            &self,
            _query_vector: &[f32],
            _k: usize,
        ) -> quarry_common::errors::Result<Vec<(ChunkKey, f32)>> {
            Err(EngineError::IndexUnavailable {
                message: "semantic index offline".to_string(),
            })
        }

        fn len(&self) -> usize {
            1
        }
    }

    struct FailingKeyword;

    #[async_trait]
    impl KeywordIndex for FailingKeyword {
        async fn search(
            &self,
            _query_tokens: &[String],
            _k: usize,
        ) -> quarry_common::errors::Result<Vec<(ChunkKey, f32)>> {
            Err(EngineError::IndexUnavailable {
                message: "keyword index offline".to_string(),
            })
        }

        fn len(&self) -> usize {
            1
        }
    }

    fn corpus(records: Vec<ChunkRecord>, embeddings: Vec<(ChunkKey, Vec<f32>)>) -> CorpusSnapshot {
        CorpusSnapshot {
            semantic: Arc::new(InMemoryVectorIndex::new(embeddings)),
            keyword: Arc::new(InMemoryKeywordIndex::new(&records)),
            store: Arc::new(InMemoryChunkStore::new(records)),
        }
    }

    fn retriever(embedder: Arc<dyn Embedder>) -> HybridRetriever {
        HybridRetriever::new(embedder, 20, 0.05)
    }

    #[tokio::test]
    async fn test_dedup_across_variants_keeps_max_score() {
        let records = vec![
            record(1, 0, "thermal margin analysis for the hot case"),
            record(1, 1, "structural load factors"),
        ];
        let embeddings = vec![
            (records[0].key, axis(4, 0)),
            (records[1].key, axis(4, 1)),
        ];
        let snapshot = corpus(records, embeddings);

        let variants = VariantSet::new(
            "thermal margin",
            vec!["thermal margin analysis".to_string()],
            3,
        );
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(&variants, QueryClass::Lookup, &[], Some(&snapshot), None)
            .await
            .unwrap();

        // Same chunk surfaced by both variants appears exactly once
        let mut keys: Vec<ChunkKey> = output.candidates.iter().map(|c| c.record.key).collect();
        let before = keys.len();
        keys.dedup();
        assert_eq!(before, keys.len());
        assert!(!output.degraded);
    }

    #[tokio::test]
    async fn test_scope_filter_narrows_private_results() {
        let in_scope = record(1, 0, "thermal margin analysis");
        let out_of_scope = record(2, 0, "thermal margin overview");
        let embeddings = vec![
            (in_scope.key, axis(4, 0)),
            (out_of_scope.key, axis(4, 0)),
        ];
        let snapshot = corpus(vec![in_scope.clone(), out_of_scope], embeddings);

        let variants = VariantSet::original_only("thermal margin");
        let scope = vec![Uuid::from_u128(1)];
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(&variants, QueryClass::Lookup, &scope, Some(&snapshot), None)
            .await
            .unwrap();

        assert!(!output.candidates.is_empty());
        assert!(output
            .candidates
            .iter()
            .all(|c| c.record.key.document_id == Uuid::from_u128(1)));
    }

    #[tokio::test]
    async fn test_shared_corpus_union_with_provenance() {
        let private = record(1, 0, "thermal margin analysis");
        let shared = record(100, 0, "thermal design handbook chapter");
        let private_corpus = corpus(vec![private.clone()], vec![(private.key, axis(4, 0))]);
        let shared_corpus = corpus(vec![shared.clone()], vec![(shared.key, axis(4, 0))]);

        let variants = VariantSet::original_only("thermal margin");
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(
                &variants,
                QueryClass::Lookup,
                &[],
                Some(&private_corpus),
                Some(&shared_corpus),
            )
            .await
            .unwrap();

        let shared_hits: Vec<&Candidate> = output
            .candidates
            .iter()
            .filter(|c| c.record.provenance == Provenance::Shared)
            .collect();
        assert!(!shared_hits.is_empty());
        assert!(output
            .candidates
            .iter()
            .any(|c| c.record.provenance == Provenance::Private));
    }

    #[tokio::test]
    async fn test_private_before_shared_on_tie() {
        // Identical text and embedding in both corpora forces a tie
        let private = record(1, 0, "identical passage");
        let mut shared = record(100, 0, "identical passage");
        shared.provenance = Provenance::Shared;

        let private_corpus = corpus(vec![private.clone()], vec![(private.key, axis(4, 0))]);
        let shared_corpus = corpus(vec![shared.clone()], vec![(shared.key, axis(4, 0))]);

        let variants = VariantSet::original_only("identical passage thermal");
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(
                &variants,
                QueryClass::Lookup,
                &[],
                Some(&private_corpus),
                Some(&shared_corpus),
            )
            .await
            .unwrap();

        let provenances: Vec<Provenance> = output
            .candidates
            .iter()
            .map(|c| c.record.provenance)
            .collect();
        let first_shared = provenances.iter().position(|p| *p == Provenance::Shared);
        let last_private = provenances.iter().rposition(|p| *p == Provenance::Private);
        if let (Some(first_shared), Some(last_private)) = (first_shared, last_private) {
            assert!(last_private < first_shared);
        }
    }

    #[tokio::test]
    async fn test_semantic_failure_degrades_to_keyword() {
        let records = vec![record(1, 0, "thermal margin analysis")];
        let snapshot = CorpusSnapshot {
            semantic: Arc::new(FailingSemantic),
            keyword: Arc::new(InMemoryKeywordIndex::new(&records)),
            store: Arc::new(InMemoryChunkStore::new(records)),
        };

        let variants = VariantSet::original_only("thermal margin");
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(&variants, QueryClass::Lookup, &[], Some(&snapshot), None)
            .await
            .unwrap();

        assert!(output.degraded);
        assert!(!output.candidates.is_empty());
        assert!(output
            .candidates
            .iter()
            .all(|c| c.signal == RetrievalSignal::Keyword));
    }

    #[tokio::test]
    async fn test_both_indices_failing_is_fatal() {
        let snapshot = CorpusSnapshot {
            semantic: Arc::new(FailingSemantic),
            keyword: Arc::new(FailingKeyword),
            store: Arc::new(InMemoryChunkStore::default()),
        };

        let variants = VariantSet::original_only("thermal margin");
        let result = retriever(Arc::new(AxisEmbedder))
            .retrieve(&variants, QueryClass::Lookup, &[], Some(&snapshot), None)
            .await;

        assert!(matches!(result, Err(EngineError::IndexUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_no_relevant_chunks_yields_empty_output() {
        let records = vec![record(1, 0, "budget allocations for next year")];
        let snapshot = corpus(records.clone(), vec![(records[0].key, axis(4, 3))]);

        let variants = VariantSet::original_only("thermal margin");
        let output = retriever(Arc::new(AxisEmbedder))
            .retrieve(&variants, QueryClass::Lookup, &[], Some(&snapshot), None)
            .await
            .unwrap();

        assert!(output.candidates.is_empty());
    }
}
