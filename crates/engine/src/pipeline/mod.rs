//! Query pipeline orchestration
//!
//! Drives one query through route, rewrite, retrieve, rerank,
//! generate, and evaluate, looping on rejection until the evaluator
//! accepts or the rewrite budget runs out. The attempt counter is the
//! only loop variable; every retry path goes through it, so the loop
//! is bounded no matter which stage requested the retry.
//!
//! Corpus snapshots are bound once per pass. A pass that starts on one
//! snapshot finishes on it even if ingestion publishes a replacement
//! mid-flight.

use crate::analyze::QueryAnalyzer;
use crate::evaluate::{Evaluation, SelfEvaluator};
use crate::generate::{Draft, Generator};
use crate::index::CorpusProvider;
use crate::rerank::{create_cross_encoder, CrossEncoder, Reranker};
use crate::retrieval::HybridRetriever;
use crate::rewrite::QueryRewriter;
use crate::router::{route, Route};
use crate::summarize::Summarizer;
use crate::types::{Answer, Query, RerankedEvidence, Verdict};
use chrono::Utc;
use quarry_common::config::EngineConfig;
use quarry_common::embeddings::{create_embedder, Embedder};
use quarry_common::errors::{EngineError, Result};
use quarry_common::llm::{create_completion_client, CompletionClient};
use quarry_common::metrics::{self, StageTimer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Instrument;

/// Cooperative cancellation handle. Checked at stage boundaries; a
/// stage that already started runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// One grounded attempt's output, kept around so the best attempt can
/// be returned when the budget runs out
struct Attempt {
    draft: Draft,
    evidence: RerankedEvidence,
    retrieval_degraded: bool,
}

/// The query engine: owns every pipeline stage and the corpus
/// directory, and is shared across concurrent queries.
pub struct QueryEngine {
    config: EngineConfig,
    corpora: Arc<dyn CorpusProvider>,
    rewriter: QueryRewriter,
    retriever: HybridRetriever,
    reranker: Reranker,
    generator: Generator,
    summarizer: Summarizer,
    evaluator: SelfEvaluator,
}

impl QueryEngine {
    /// Assemble an engine from explicit collaborators. Tests and
    /// embedding applications that bring their own clients use this.
    pub fn new(
        config: EngineConfig,
        corpora: Arc<dyn CorpusProvider>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        let rewrite_completion = config
            .rewrite
            .use_llm_rewrites
            .then(|| completion.clone());

        Self {
            rewriter: QueryRewriter::new(rewrite_completion, config.rewrite.max_alt_queries),
            retriever: HybridRetriever::new(
                embedder,
                config.retrieval.retrieve_top_k,
                config.retrieval.relevance_floor,
            ),
            reranker: Reranker::new(
                cross_encoder,
                config.retrieval.rerank_top_n,
                config.rerank_timeout(),
            ),
            generator: Generator::new(completion.clone()),
            summarizer: Summarizer::new(completion),
            evaluator: SelfEvaluator::new(
                config.evaluation.accept_threshold,
                config.rewrite.max_rewrites,
            ),
            config,
            corpora,
        }
    }

    /// Assemble an engine with clients built from configuration
    pub fn from_config(config: EngineConfig, corpora: Arc<dyn CorpusProvider>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let cross_encoder = create_cross_encoder(&config.reranker, config.rerank_timeout())?;
        let completion = create_completion_client(&config.completion)?;
        Ok(Self::new(config, corpora, embedder, cross_encoder, completion))
    }

    /// Answer a query
    pub async fn submit(&self, query: Query) -> Result<Answer> {
        self.submit_with_cancel(query, CancelToken::new()).await
    }

    /// Answer a query with cooperative cancellation
    pub async fn submit_with_cancel(&self, query: Query, cancel: CancelToken) -> Result<Answer> {
        if query.text.trim().is_empty() {
            return Err(EngineError::Validation {
                message: "query text is empty".to_string(),
            });
        }

        let selected_route = route(&query);
        let span = tracing::info_span!(
            "query",
            workspace = %query.workspace_id,
            route = ?selected_route,
        );
        async {
            match selected_route {
                Route::DirectChat => {
                    metrics::record_query("direct_chat");
                    self.direct_chat(&query).await
                }
                Route::Summarize => {
                    metrics::record_query("summarize");
                    cancel.check()?;
                    self.summarize(&query).await
                }
                Route::Grounded => {
                    metrics::record_query("grounded");
                    self.grounded(&query, &cancel).await
                }
                Route::NoSources => {
                    metrics::record_query("no_sources");
                    Err(EngineError::NoSourcesAvailable)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn direct_chat(&self, query: &Query) -> Result<Answer> {
        let _timer = StageTimer::start("chat");
        let answer = self.generator.chat(&query.text).await?;
        Ok(Answer {
            answer,
            reasoning: String::new(),
            citations: Vec::new(),
            confident: true,
            verdict: Verdict::Sufficient,
            missing_info: String::new(),
            answered_at: Utc::now(),
        })
    }

    async fn summarize(&self, query: &Query) -> Result<Answer> {
        let _timer = StageTimer::start("summarize");
        let cell = self
            .corpora
            .workspace(query.workspace_id)
            .ok_or_else(|| EngineError::IndexUnavailable {
                message: format!("no corpus for workspace {}", query.workspace_id),
            })?;
        let snapshot = cell.current();

        let answer = self
            .summarizer
            .summarize(&query.text, &query.selected_document_ids, &snapshot.store)
            .await?;
        if !answer.confident {
            metrics::record_degraded("summarize");
        }
        Ok(answer)
    }

    /// The rewrite-retrieve-rerank-generate-evaluate loop
    async fn grounded(&self, query: &Query, cancel: &CancelToken) -> Result<Answer> {
        let class = QueryAnalyzer::classify(&query.text);
        tracing::debug!(?class, "Query classified");

        let mut attempt = 0;
        let mut hint: Option<String> = None;
        let mut best: Option<Attempt> = None;

        loop {
            cancel.check()?;

            let variants = {
                let _timer = StageTimer::start("rewrite");
                self.rewriter
                    .rewrite(&query.text, class, hint.as_deref(), attempt)
                    .await
            };
            tracing::debug!(attempt, variants = variants.len(), "Variants prepared");

            cancel.check()?;

            // Snapshots bind here and hold for the whole pass
            let workspace = if query.has_documents() {
                let cell = self.corpora.workspace(query.workspace_id).ok_or_else(|| {
                    EngineError::IndexUnavailable {
                        message: format!("no corpus for workspace {}", query.workspace_id),
                    }
                })?;
                Some(cell.current())
            } else {
                None
            };
            let shared = query
                .augment_shared
                .then(|| self.corpora.shared().map(|cell| cell.current()))
                .flatten();
            if workspace.is_none() && shared.is_none() {
                return Err(EngineError::NoSourcesAvailable);
            }

            let output = {
                let _timer = StageTimer::start("retrieve");
                self.retriever
                    .retrieve(
                        &variants,
                        class,
                        &query.selected_document_ids,
                        workspace.as_deref(),
                        shared.as_deref(),
                    )
                    .await?
            };

            cancel.check()?;

            let evidence = {
                let _timer = StageTimer::start("rerank");
                self.reranker.rerank(&query.text, &output.candidates).await
            };

            cancel.check()?;

            let draft = {
                let _timer = StageTimer::start("generate");
                match self.generator.generate(&query.text, &evidence).await {
                    Ok(draft) => draft,
                    Err(e) if e.is_degradable() => {
                        tracing::warn!(error = %e, attempt, "Generation failed, treating as gap");
                        Draft {
                            answer: String::new(),
                            reasoning: String::new(),
                            verdict: Verdict::Gap,
                            missing_info: String::new(),
                            citations: Vec::new(),
                            parsed: false,
                        }
                    }
                    Err(e) => return Err(e),
                }
            };

            let evaluation = self.evaluator.evaluate(&draft, &evidence, attempt);

            let current = Attempt {
                draft,
                evidence,
                retrieval_degraded: output.degraded,
            };

            match evaluation {
                Evaluation::Accept => {
                    return Ok(self.finalize(current, false));
                }
                Evaluation::Retry { missing_info } => {
                    metrics::record_retry();
                    hint = Some(missing_info);
                    attempt += 1;

                    // Keep the strongest rejected attempt in case the
                    // budget runs out
                    let stronger = best
                        .as_ref()
                        .map(|b| current.evidence.top_score() > b.evidence.top_score())
                        .unwrap_or(true);
                    if stronger {
                        best = Some(current);
                    }
                }
                Evaluation::AcceptDegraded => {
                    metrics::record_degraded("budget_exhausted");
                    let kept = match best {
                        Some(b) if b.evidence.top_score() > current.evidence.top_score() => b,
                        _ => current,
                    };
                    return Ok(self.finalize(kept, true));
                }
            }
        }
    }

    fn finalize(&self, attempt: Attempt, budget_exhausted: bool) -> Answer {
        let Attempt {
            draft,
            evidence,
            retrieval_degraded,
        } = attempt;

        // Nothing answerable at all across every attempt
        if draft.answer.trim().is_empty() && evidence.is_empty() {
            return Answer::not_found();
        }

        if retrieval_degraded {
            metrics::record_degraded("retrieval_signal");
        }

        let confident = !budget_exhausted && !retrieval_degraded && draft.parsed;
        Answer {
            answer: draft.answer,
            reasoning: draft.reasoning,
            citations: draft.citations,
            confident,
            verdict: draft.verdict,
            missing_info: draft.missing_info,
            answered_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
