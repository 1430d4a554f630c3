//! Grounded answer generation
//!
//! Builds a numbered evidence context, asks the completion service for
//! a structured answer, and maps the model's cited evidence indices
//! back to chunk keys. Citations can only reference the numbered
//! blocks that were in the prompt, so the citation set is a subset of
//! the evidence set by construction.

use crate::types::{Citation, EvidenceItem, Provenance, RerankedEvidence, Verdict};
use quarry_common::errors::{EngineError, Result};
use quarry_common::llm::CompletionClient;
use serde::Deserialize;
use std::sync::Arc;

const EXCERPT_CHARS: usize = 240;

const GROUNDED_SYSTEM: &str = "You are a precise research assistant. Answer ONLY from the \
numbered evidence blocks provided. Never use outside knowledge. Reply with JSON only.";

const GROUNDED_PROMPT: &str = r#"Evidence blocks:

{evidence}

Question: {query}

Instructions:
1. Answer using ONLY the evidence blocks above.
2. Set context_verdict to "SUFFICIENT" if the evidence fully answers the
   question, "GAP" if it partially answers it, "EMPTY" if it does not
   address it at all.
3. When the verdict is not SUFFICIENT, describe what is missing in
   missing_info as a short search-friendly phrase.
4. List the block numbers you actually used in cited_evidence.

Return ONLY valid JSON:
{"answer": "...", "reasoning": "...", "context_verdict": "SUFFICIENT|GAP|EMPTY", "missing_info": "...", "cited_evidence": [1, 2]}"#;

const CHAT_SYSTEM: &str = "You are a helpful assistant for a document research tool. The user \
has not attached any documents; answer conversationally and briefly.";

/// Generator output for one attempt, before evaluation
#[derive(Debug, Clone)]
pub struct Draft {
    pub answer: String,
    pub reasoning: String,
    pub verdict: Verdict,
    pub missing_info: String,
    pub citations: Vec<Citation>,

    /// False when the model output failed the structured contract and
    /// the raw text was kept as a best-effort answer
    pub parsed: bool,
}

impl Draft {
    /// Draft for a pass whose evidence set came back empty; no model
    /// call is made for these.
    pub fn empty_evidence() -> Self {
        Self {
            answer: String::new(),
            reasoning: String::new(),
            verdict: Verdict::Empty,
            missing_info: "No relevant passages were retrieved.".to_string(),
            citations: Vec::new(),
            parsed: true,
        }
    }
}

#[derive(Deserialize)]
struct GeneratorResponse {
    answer: String,
    #[serde(default)]
    reasoning: String,
    context_verdict: String,
    #[serde(default)]
    missing_info: String,
    #[serde(default)]
    cited_evidence: Vec<usize>,
}

/// Evidence-grounded answer generator
pub struct Generator {
    completion: Arc<dyn CompletionClient>,
}

impl Generator {
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self { completion }
    }

    /// Generate a grounded draft from the evidence set.
    ///
    /// Empty evidence short-circuits to an EMPTY draft without a model
    /// call. A completion timeout gets one retry with the evidence set
    /// halved before the error propagates.
    pub async fn generate(&self, query: &str, evidence: &RerankedEvidence) -> Result<Draft> {
        if evidence.is_empty() {
            return Ok(Draft::empty_evidence());
        }

        match self.generate_once(query, evidence, evidence.items.len()).await {
            Ok(draft) => Ok(draft),
            Err(EngineError::CompletionTimeout { .. }) if evidence.items.len() > 1 => {
                let halved = evidence.items.len() / 2;
                tracing::warn!(
                    evidence = evidence.items.len(),
                    halved,
                    "Completion timed out, retrying with reduced evidence"
                );
                self.generate_once(query, evidence, halved).await
            }
            Err(e) => Err(e),
        }
    }

    /// Unscoped conversational completion for queries routed around
    /// retrieval entirely.
    pub async fn chat(&self, query: &str) -> Result<String> {
        self.completion.complete(CHAT_SYSTEM, query).await
    }

    async fn generate_once(
        &self,
        query: &str,
        evidence: &RerankedEvidence,
        take: usize,
    ) -> Result<Draft> {
        let items = &evidence.items[..take.min(evidence.items.len())];

        let blocks: Vec<String> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let badge = match item.record.provenance {
                    Provenance::Private => "workspace",
                    Provenance::Shared => "shared library",
                };
                format!(
                    "[{}] ({}, doc {}, page {})\n{}",
                    i + 1,
                    badge,
                    item.record.key.document_id,
                    item.record.page,
                    item.record.text
                )
            })
            .collect();

        let prompt = GROUNDED_PROMPT
            .replace("{evidence}", &blocks.join("\n\n"))
            .replace("{query}", query);

        let response = self.completion.complete(GROUNDED_SYSTEM, &prompt).await?;

        Ok(self.parse_response(&response, items))
    }

    /// Parse the structured response; malformed output keeps the raw
    /// text as a low-trust answer rather than failing the query.
    fn parse_response(&self, response: &str, items: &[EvidenceItem]) -> Draft {
        let json = extract_json(response);
        let parsed: Option<GeneratorResponse> =
            json.and_then(|j| serde_json::from_str(j).ok());

        let Some(parsed) = parsed else {
            tracing::warn!("Generator output failed the structured contract, keeping raw text");
            return Draft {
                answer: response.trim().to_string(),
                reasoning: String::new(),
                verdict: Verdict::Gap,
                missing_info: "Model output did not follow the structured answer format."
                    .to_string(),
                citations: Vec::new(),
                parsed: false,
            };
        };

        let verdict = Verdict::parse(&parsed.context_verdict).unwrap_or(Verdict::Gap);

        // 1-based block numbers from the prompt; out-of-range and
        // duplicate references are dropped
        let mut seen = std::collections::HashSet::new();
        let citations: Vec<Citation> = parsed
            .cited_evidence
            .iter()
            .filter(|&&n| n >= 1 && n <= items.len() && seen.insert(n))
            .map(|&n| {
                let record = &items[n - 1].record;
                Citation {
                    key: record.key,
                    page: record.page,
                    excerpt: excerpt(&record.text),
                    provenance: record.provenance,
                }
            })
            .collect();

        Draft {
            answer: parsed.answer,
            reasoning: parsed.reasoning,
            verdict,
            missing_info: parsed.missing_info,
            citations,
            parsed: true,
        }
    }
}

/// Short leading excerpt for citation display, cut at a char boundary
fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut end = EXCERPT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end].trim_end())
}

/// Pull the JSON object out of a model response that may wrap it in
/// code fences or prose.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
