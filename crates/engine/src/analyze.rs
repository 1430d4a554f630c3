//! Query analyzer
//!
//! Classifies a query into a small closed set of strategy classes.
//! The class selects the fusion-weight profile used by the retriever
//! and whether LLM-assisted rewriting runs on the first pass or only
//! after a failed evaluation.
//!
//! Pure heuristic, no model call - classification is deterministic so
//! retrieval behavior is reproducible for identical inputs.

use serde::{Deserialize, Serialize};

/// Closed set of query strategy classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// Single concept, direct lookup
    Lookup,
    /// Requires combining information from multiple sources
    MultiHop,
    /// Involves equations, derivations, or numerical reasoning
    Numeric,
    /// Comparing two or more concepts, methods, or results
    Comparison,
}

impl QueryClass {
    /// Whether LLM-assisted paraphrasing should run before the first
    /// retrieval pass. Lookup queries go straight to retrieval with
    /// heuristic expansion only; complex classes paraphrase up front.
    pub fn rewrite_first_pass(&self) -> bool {
        !matches!(self, QueryClass::Lookup)
    }
}

/// Deterministic query classifier
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Classify a query into its strategy class
    pub fn classify(query: &str) -> QueryClass {
        let lower = query.to_lowercase();

        // Comparison patterns first: "vs" queries often also contain
        // lookup phrasing ("what is the difference between A and B")
        if lower.contains(" vs ")
            || lower.contains(" versus ")
            || lower.contains("compare")
            || lower.contains("difference between")
            || lower.contains("better than")
        {
            return QueryClass::Comparison;
        }

        if Self::looks_numeric(&lower) {
            return QueryClass::Numeric;
        }

        if Self::looks_multi_hop(&lower) {
            return QueryClass::MultiHop;
        }

        QueryClass::Lookup
    }

    fn looks_numeric(lower: &str) -> bool {
        const NUMERIC_MARKERS: &[&str] = &[
            "calculate",
            "compute",
            "derive",
            "derivation",
            "equation",
            "formula",
            "how many",
            "how much",
            "percentage",
            "sum of",
            "average",
        ];
        NUMERIC_MARKERS.iter().any(|m| lower.contains(m))
    }

    fn looks_multi_hop(lower: &str) -> bool {
        // Causal/explanatory questions and conjoined questions tend to
        // need evidence from more than one place
        const MULTI_HOP_MARKERS: &[&str] = &[
            "why ",
            "how does",
            "how do ",
            "impact of",
            "effect of",
            "affect",
            "relationship between",
            "lead to",
            "depend on",
        ];
        if MULTI_HOP_MARKERS.iter().any(|m| lower.contains(m)) {
            return true;
        }

        // Two question marks, or an "and" joining two clauses that each
        // carry a question word
        lower.matches('?').count() > 1
    }
}
