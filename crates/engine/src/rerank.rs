//! Cross-encoder reranking
//!
//! Rescores fused candidates against the original query with a
//! cross-encoder and keeps the top N as the evidence set. Reranking is
//! an accuracy refinement, not a requirement: on timeout or service
//! failure the evidence keeps its fused retrieval order and the pass
//! is marked unreranked so confidence reporting downstream can see it.

use crate::types::{Candidate, EvidenceItem, RerankedEvidence};
use async_trait::async_trait;
use quarry_common::config::RerankerConfig;
use quarry_common::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Batched query/passage relevance scorer
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score every passage against the query. Returns one relevance
    /// score in [0, 1] per passage, in input order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// HTTP cross-encoder client (`/rerank` shape: query + documents in,
/// index/score pairs out)
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

impl HttpCrossEncoder {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url);

        let request = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: passages.to_vec(),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| EngineError::Reranker {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Reranker {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: RerankResponse =
            response.json().await.map_err(|e| EngineError::Reranker {
                message: format!("Failed to parse response: {}", e),
            })?;

        let mut scores = vec![0.0; passages.len()];
        for row in result.results {
            if row.index >= scores.len() {
                return Err(EngineError::Reranker {
                    message: format!("Response index {} out of range", row.index),
                });
            }
            scores[row.index] = row.relevance_score.clamp(0.0, 1.0);
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create a cross-encoder from configuration. Absent endpoint means
/// reranking is skipped entirely and evidence keeps fused order.
pub fn create_cross_encoder(
    config: &RerankerConfig,
    timeout: Duration,
) -> Result<Option<Arc<dyn CrossEncoder>>> {
    match &config.api_base {
        Some(base) => Ok(Some(Arc::new(HttpCrossEncoder::new(
            base.clone(),
            config.api_key.clone(),
            config.model.clone(),
            timeout,
        )?))),
        None => {
            tracing::warn!("No reranker endpoint configured, evidence will keep fused order");
            Ok(None)
        }
    }
}

/// Reranking stage
pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    top_n: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(encoder: Option<Arc<dyn CrossEncoder>>, top_n: usize, timeout: Duration) -> Self {
        Self {
            encoder,
            top_n,
            timeout,
        }
    }

    /// Rescore candidates against the original query and keep the top N.
    ///
    /// Cross-encoder failures and timeouts degrade to the fused order
    /// with `reranked: false`; they never fail the query.
    pub async fn rerank(&self, query: &str, candidates: &[Candidate]) -> RerankedEvidence {
        if candidates.is_empty() {
            return RerankedEvidence::default();
        }

        let Some(encoder) = &self.encoder else {
            return self.fused_order(candidates);
        };

        let passages: Vec<String> = candidates.iter().map(|c| c.record.text.clone()).collect();
        let scored = tokio::time::timeout(self.timeout, encoder.score(query, &passages)).await;

        let scores = match scored {
            Ok(Ok(scores)) if scores.len() == candidates.len() => scores,
            Ok(Ok(scores)) => {
                tracing::warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    "Reranker returned wrong score count, keeping fused order"
                );
                quarry_common::metrics::record_reranker_fallback();
                return self.fused_order(candidates);
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Reranker failed, keeping fused order");
                quarry_common::metrics::record_reranker_fallback();
                return self.fused_order(candidates);
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Reranker timed out, keeping fused order");
                quarry_common::metrics::record_reranker_fallback();
                return self.fused_order(candidates);
            }
        };

        let mut items: Vec<EvidenceItem> = candidates
            .iter()
            .zip(scores)
            .map(|(candidate, relevance)| EvidenceItem {
                record: candidate.record.clone(),
                relevance,
            })
            .collect();

        // Stable sort: fused order breaks cross-encoder score ties
        items.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(self.top_n);

        RerankedEvidence {
            items,
            reranked: true,
        }
    }

    fn fused_order(&self, candidates: &[Candidate]) -> RerankedEvidence {
        let items = candidates
            .iter()
            .take(self.top_n)
            .map(|candidate| EvidenceItem {
                record: candidate.record.clone(),
                relevance: candidate.score,
            })
            .collect();

        RerankedEvidence {
            items,
            reranked: false,
        }
    }
}
