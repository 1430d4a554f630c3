//! Query rewriter
//!
//! Produces a bounded set of alternative query phrasings to widen
//! recall. The unmodified original is always the first variant - exact
//! term recall is preserved as a floor no matter what the expansion
//! does.
//!
//! Abbreviation expansion is the single biggest cause of recovered
//! retrieval misses: a query using "TRL" will not keyword-match a
//! document that spells out "Technology Readiness Level", so expansion
//! variants carry both surface forms at once.

use crate::analyze::QueryClass;
use crate::types::VariantSet;
use quarry_common::errors::Result;
use quarry_common::llm::CompletionClient;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const REWRITER_SYSTEM: &str =
    "You are a query optimizer for a document retrieval system. Reply with JSON only.";

const REWRITER_PROMPT: &str = r#"Rewrite the user query into up to {n} search-friendly variants.

Rules:
1. ALWAYS expand acronyms, keeping both forms: "TRL" -> "Technology Readiness Level (TRL)".
2. Use the EXACT terminology that would appear in a technical document.
3. For definition questions, include "definition" / "explained" phrasings.
4. Never repeat the original query verbatim.
{hint_block}
Return ONLY valid JSON:
{"rewritten_queries": ["...", "..."]}

User query: {query}"#;

const RETRY_HINT_BLOCK: &str = r#"5. This is a RETRY. The previous attempt was missing: "{hint}".
   Bias every variant toward resolving that gap. Take a genuinely
   different angle; do not re-derive unrelated paraphrases.
"#;

#[derive(Deserialize)]
struct RewriteResponse {
    rewritten_queries: Vec<String>,
}

/// Query rewriter with heuristic expansion and optional LLM paraphrasing
pub struct QueryRewriter {
    completion: Option<Arc<dyn CompletionClient>>,
    max_alt_queries: usize,
    abbreviations: HashMap<&'static str, &'static str>,
    acronym_pattern: Regex,
}

impl QueryRewriter {
    pub fn new(completion: Option<Arc<dyn CompletionClient>>, max_alt_queries: usize) -> Self {
        Self {
            completion,
            max_alt_queries,
            abbreviations: Self::load_abbreviations(),
            acronym_pattern: Regex::new(r"\b[A-Z][A-Z0-9]{1,5}\b")
                .expect("static acronym pattern"),
        }
    }

    /// Produce the variant set for one retrieval pass.
    ///
    /// `hint` carries the missing-information signal from a prior
    /// failed evaluation; `attempt` is zero on the first pass.
    pub async fn rewrite(
        &self,
        original: &str,
        class: QueryClass,
        hint: Option<&str>,
        attempt: usize,
    ) -> VariantSet {
        let mut alternates = Vec::new();

        // On retries, hint-directed variants come first so they survive
        // the fan-out cap
        if let Some(hint) = hint.filter(|h| !h.trim().is_empty()) {
            alternates.push(hint.trim().to_string());
            alternates.push(format!("{} {}", original.trim_end_matches('?'), hint.trim()));
        }

        if let Some(expanded) = self.expand_abbreviations(original) {
            alternates.push(expanded);
        }

        alternates.extend(self.definition_variants(original));

        // LLM paraphrasing: complex classes up front, every class on
        // retries. Failures fall back to the heuristic variants alone.
        if attempt > 0 || class.rewrite_first_pass() {
            if let Some(completion) = &self.completion {
                match self.llm_variants(completion.as_ref(), original, hint).await {
                    Ok(generated) => alternates.extend(generated),
                    Err(e) => {
                        tracing::warn!(error = %e, "LLM rewrite failed, using heuristic variants");
                    }
                }
            }
        }

        VariantSet::new(original, alternates, self.max_alt_queries)
    }

    /// Detect short all-uppercase tokens and expand known ones, keeping
    /// short and long forms in the same variant so index lookups match
    /// either surface form.
    fn expand_abbreviations(&self, query: &str) -> Option<String> {
        let mut expanded = query.to_string();
        let mut changed = false;

        for m in self.acronym_pattern.find_iter(query) {
            let token = m.as_str();
            if let Some(long_form) = self.abbreviations.get(token) {
                expanded = expanded.replace(token, &format!("{} ({})", long_form, token));
                changed = true;
            }
        }

        changed.then_some(expanded)
    }

    /// "what is X" style queries also get "X definition" / "X explained"
    fn definition_variants(&self, query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        let prefix_len = ["what is ", "what are ", "define "]
            .iter()
            .find(|prefix| lower.starts_with(*prefix))
            .map(|prefix| prefix.len());

        let Some(prefix_len) = prefix_len else {
            return vec![];
        };

        let subject = query[prefix_len..].trim_end_matches(['?', '.', ' ']);
        if subject.is_empty() {
            return vec![];
        }

        vec![
            format!("{} definition", subject),
            format!("{} explained", subject),
        ]
    }

    async fn llm_variants(
        &self,
        completion: &dyn CompletionClient,
        original: &str,
        hint: Option<&str>,
    ) -> Result<Vec<String>> {
        let hint_block = match hint {
            Some(hint) => RETRY_HINT_BLOCK.replace("{hint}", hint),
            None => String::new(),
        };
        let prompt = REWRITER_PROMPT
            .replace("{n}", &self.max_alt_queries.to_string())
            .replace("{hint_block}", &hint_block)
            .replace("{query}", original);

        let response = completion.complete(REWRITER_SYSTEM, &prompt).await?;
        let parsed: RewriteResponse = serde_json::from_str(strip_fences(&response))?;
        Ok(parsed.rewritten_queries)
    }

    fn load_abbreviations() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TRL", "Technology Readiness Level"),
            ("SLA", "Service Level Agreement"),
            ("EIS", "Environmental Impact Statement"),
            ("ML", "machine learning"),
            ("NLP", "natural language processing"),
            ("CV", "computer vision"),
            ("DL", "deep learning"),
            ("LLM", "large language model"),
            ("RL", "reinforcement learning"),
            ("GAN", "generative adversarial network"),
            ("VAE", "variational autoencoder"),
            ("API", "application programming interface"),
            ("EMC", "electromagnetic compatibility"),
            ("EMI", "electromagnetic interference"),
            ("FEA", "finite element analysis"),
            ("CFD", "computational fluid dynamics"),
            ("RAG", "retrieval-augmented generation"),
        ])
    }
}

/// Strip markdown code fences that models wrap around JSON
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}
