//! Document summarization
//!
//! Map-reduce digest over the selected documents. Chunks are batched
//! into character-bounded windows, each window is digested
//! independently, and one reduce call folds the partial digests into
//! the final summary. Citations are document-level: the first chunk of
//! each document that contributed a digest.

use crate::index::ChunkStore;
use crate::types::{Answer, Citation, ChunkRecord, Verdict};
use chrono::Utc;
use quarry_common::errors::{EngineError, Result};
use quarry_common::llm::CompletionClient;
use std::sync::Arc;
use uuid::Uuid;

/// Character budget per map window, sized for small completion models
const MAP_WINDOW_CHARS: usize = 8_000;

const MAP_SYSTEM: &str = "You summarize excerpts of technical documents. Be factual and dense; \
keep numbers, named entities, and findings. Plain text only.";

const MAP_PROMPT: &str = r#"Summarize the following document excerpt in at most 150 words,
focusing on what is relevant to the user's request.

User request: {query}

Excerpt:
{text}"#;

const REDUCE_SYSTEM: &str = "You combine partial summaries of one or more documents into a \
single coherent summary. Plain text only.";

const REDUCE_PROMPT: &str = r#"Combine the partial summaries below into one summary that
addresses the user's request. Do not invent content that is not in the
partial summaries.

User request: {query}

Partial summaries:
{partials}"#;

/// Map-reduce document summarizer
pub struct Summarizer {
    completion: Arc<dyn CompletionClient>,
}

impl Summarizer {
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self { completion }
    }

    /// Digest the selected documents into one answer.
    ///
    /// Individual window failures degrade the result instead of
    /// failing it; the query only errors when no window digests at
    /// all.
    pub async fn summarize(
        &self,
        query: &str,
        document_ids: &[Uuid],
        store: &Arc<dyn ChunkStore>,
    ) -> Result<Answer> {
        let mut partials = Vec::new();
        let mut citations = Vec::new();
        let mut degraded = false;
        let mut window_failures = false;

        for &document_id in document_ids {
            let chunks = store.document_chunks(document_id).await?;
            if chunks.is_empty() {
                tracing::warn!(%document_id, "Selected document has no chunks, skipping");
                degraded = true;
                continue;
            }

            let mut contributed = false;
            for window in windows(&chunks) {
                match self.map_window(query, &window).await {
                    Ok(partial) => {
                        partials.push(partial);
                        contributed = true;
                    }
                    Err(e) => {
                        tracing::warn!(%document_id, error = %e, "Digest window failed, skipping");
                        degraded = true;
                        window_failures = true;
                    }
                }
            }

            if contributed {
                let first = &chunks[0];
                citations.push(Citation {
                    key: first.key,
                    page: first.page,
                    excerpt: String::new(),
                    provenance: first.provenance,
                });
            }
        }

        if partials.is_empty() {
            if window_failures {
                return Err(EngineError::Completion {
                    message: "every digest window failed".to_string(),
                });
            }
            return Ok(Answer::not_found());
        }

        let (summary, reduce_degraded) = self.reduce(query, &partials).await;

        Ok(Answer {
            answer: summary,
            reasoning: String::new(),
            citations,
            confident: !degraded && !reduce_degraded,
            verdict: Verdict::Sufficient,
            missing_info: String::new(),
            answered_at: Utc::now(),
        })
    }

    async fn map_window(&self, query: &str, window: &str) -> Result<String> {
        let prompt = MAP_PROMPT
            .replace("{query}", query)
            .replace("{text}", window);
        self.completion.complete(MAP_SYSTEM, &prompt).await
    }

    /// Fold partials into one summary. A single partial skips the
    /// reduce call; a reduce failure falls back to joining the
    /// partials with confidence withdrawn.
    async fn reduce(&self, query: &str, partials: &[String]) -> (String, bool) {
        if partials.len() == 1 {
            return (partials[0].clone(), false);
        }

        let numbered: Vec<String> = partials
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{}] {}", i + 1, p))
            .collect();
        let prompt = REDUCE_PROMPT
            .replace("{query}", query)
            .replace("{partials}", &numbered.join("\n\n"));

        match self.completion.complete(REDUCE_SYSTEM, &prompt).await {
            Ok(summary) => (summary, false),
            Err(e) => {
                tracing::warn!(error = %e, "Reduce step failed, returning joined partials");
                (partials.join("\n\n"), true)
            }
        }
    }
}

/// Pack chunk texts into character-bounded windows, preserving chunk
/// order. A chunk larger than the window gets its own window rather
/// than being split.
fn windows(chunks: &[ChunkRecord]) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current = String::new();

    for chunk in chunks {
        if !current.is_empty() && current.len() + chunk.text.len() > MAP_WINDOW_CHARS {
            windows.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&chunk.text);
    }
    if !current.is_empty() {
        windows.push(current);
    }

    windows
}
