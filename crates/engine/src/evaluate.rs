//! Self-evaluation gate
//!
//! Deterministic accept/retry decision after each generation attempt.
//! No model call: the verdict already came from the generator, and the
//! evidence strength signal comes from the reranker, so evaluation is
//! a pure function of (draft, evidence, attempt). Identical inputs
//! always make the same decision.

use crate::generate::Draft;
use crate::types::{RerankedEvidence, Verdict};

/// Outcome of evaluating one generation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The answer stands as-is
    Accept,

    /// Evidence was insufficient and retry budget remains; the hint
    /// feeds the next rewrite pass
    Retry { missing_info: String },

    /// Budget exhausted without an acceptable answer; return the best
    /// draft with confidence withdrawn
    AcceptDegraded,
}

/// Deterministic answer acceptance gate
pub struct SelfEvaluator {
    accept_threshold: f32,
    max_rewrites: usize,
}

impl SelfEvaluator {
    pub fn new(accept_threshold: f32, max_rewrites: usize) -> Self {
        Self {
            accept_threshold,
            max_rewrites,
        }
    }

    /// Decide whether the draft stands, retries, or ships degraded.
    ///
    /// Acceptance needs both the generator's SUFFICIENT verdict and a
    /// top evidence score at or above the threshold; either signal
    /// alone is not trusted.
    pub fn evaluate(
        &self,
        draft: &Draft,
        evidence: &RerankedEvidence,
        attempt: usize,
    ) -> Evaluation {
        let sufficient = draft.verdict == Verdict::Sufficient;
        let strong_evidence = evidence.top_score() >= self.accept_threshold;

        if sufficient && strong_evidence {
            return Evaluation::Accept;
        }

        if attempt < self.max_rewrites {
            let missing_info = if draft.missing_info.trim().is_empty() {
                "additional context for the original question".to_string()
            } else {
                draft.missing_info.trim().to_string()
            };
            tracing::debug!(
                attempt,
                verdict = ?draft.verdict,
                top_score = evidence.top_score(),
                missing_info,
                "Answer rejected, retrying"
            );
            return Evaluation::Retry { missing_info };
        }

        tracing::info!(
            attempt,
            verdict = ?draft.verdict,
            top_score = evidence.top_score(),
            "Retry budget exhausted, accepting degraded answer"
        );
        Evaluation::AcceptDegraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkKey, ChunkRecord, EvidenceItem, Provenance};
    use uuid::Uuid;

    fn evidence_with_top(relevance: f32) -> RerankedEvidence {
        RerankedEvidence {
            items: vec![EvidenceItem {
                record: ChunkRecord {
                    key: ChunkKey::new(Uuid::from_u128(1), 0),
                    page: 1,
                    text: "text".to_string(),
                    provenance: Provenance::Private,
                },
                relevance,
            }],
            reranked: true,
        }
    }

    fn draft(verdict: Verdict, missing: &str) -> Draft {
        Draft {
            answer: "an answer".to_string(),
            reasoning: String::new(),
            verdict,
            missing_info: missing.to_string(),
            citations: Vec::new(),
            parsed: true,
        }
    }

    fn evaluator() -> SelfEvaluator {
        SelfEvaluator::new(0.7, 2)
    }

    #[test]
    fn test_accept_needs_both_signals() {
        let e = evaluator();

        assert_eq!(
            e.evaluate(&draft(Verdict::Sufficient, ""), &evidence_with_top(0.9), 0),
            Evaluation::Accept
        );

        // Sufficient verdict but weak evidence
        assert!(matches!(
            e.evaluate(&draft(Verdict::Sufficient, ""), &evidence_with_top(0.5), 0),
            Evaluation::Retry { .. }
        ));

        // Strong evidence but a GAP verdict
        assert!(matches!(
            e.evaluate(&draft(Verdict::Gap, "the hot case"), &evidence_with_top(0.9), 0),
            Evaluation::Retry { .. }
        ));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let e = evaluator();
        assert_eq!(
            e.evaluate(&draft(Verdict::Sufficient, ""), &evidence_with_top(0.7), 0),
            Evaluation::Accept
        );
    }

    #[test]
    fn test_retry_carries_missing_info() {
        let e = evaluator();
        let result = e.evaluate(
            &draft(Verdict::Gap, "worst-case hot orbit"),
            &evidence_with_top(0.9),
            0,
        );
        assert_eq!(
            result,
            Evaluation::Retry {
                missing_info: "worst-case hot orbit".to_string()
            }
        );
    }

    #[test]
    fn test_blank_missing_info_gets_fallback_hint() {
        let e = evaluator();
        match e.evaluate(&draft(Verdict::Gap, "  "), &evidence_with_top(0.9), 0) {
            Evaluation::Retry { missing_info } => assert!(!missing_info.trim().is_empty()),
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_exhaustion_degrades() {
        let e = evaluator();
        assert_eq!(
            e.evaluate(&draft(Verdict::Gap, "still missing"), &evidence_with_top(0.9), 2),
            Evaluation::AcceptDegraded
        );
    }

    #[test]
    fn test_empty_verdict_retries_within_budget() {
        let e = evaluator();
        assert!(matches!(
            e.evaluate(&draft(Verdict::Empty, ""), &RerankedEvidence::default(), 1),
            Evaluation::Retry { .. }
        ));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let e = evaluator();
        let d = draft(Verdict::Gap, "missing piece");
        let ev = evidence_with_top(0.65);
        let first = e.evaluate(&d, &ev, 0);
        for _ in 0..5 {
            assert_eq!(e.evaluate(&d, &ev, 0), first);
        }
    }
}
