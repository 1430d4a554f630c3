//! End-to-end pipeline tests with deterministic collaborators.
//!
//! The embedder maps each text to a one-hot topic axis, the
//! cross-encoder scores by substring match, and the completion client
//! replays a script, so every test is fully reproducible.

use async_trait::async_trait;
use quarry_common::config::EngineConfig;
use quarry_common::embeddings::Embedder;
use quarry_common::errors::{EngineError, Result};
use quarry_common::llm::{CompletionClient, MockCompletion};
use quarry_engine::index::{
    CorpusSnapshot, InMemoryChunkStore, InMemoryCorpusProvider, InMemoryKeywordIndex,
    InMemoryVectorIndex, SnapshotCell,
};
use quarry_engine::rerank::CrossEncoder;
use quarry_engine::types::{ChunkKey, ChunkRecord, Provenance, Query, Verdict};
use quarry_engine::{CancelToken, QueryEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const DIM: usize = 8;

const WORKSPACE: Uuid = Uuid::from_u128(0xA1);
const DOC_PRIMARY: Uuid = Uuid::from_u128(0xD1);
const DOC_SECONDARY: Uuid = Uuid::from_u128(0xD2);

/// Topic phrases recognized by the test embedder; texts about the same
/// topic embed to the same axis, everything else to the zero vector
const TOPICS: &[&[&str]] = &[
    &["trl", "technology readiness"],
    &["thermal vacuum"],
    &["qualification campaign"],
    &["budget"],
];

fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector = vec![0.0_f32; DIM];
    if let Some(axis) = TOPICS
        .iter()
        .position(|phrases| phrases.iter().any(|p| lower.contains(p)))
    {
        vector[axis] = 1.0;
    }
    vector
}

/// Deterministic topic-axis embedder
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(topic_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "topic-axis"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Scores a passage high when it contains the needle, low otherwise
struct NeedleEncoder {
    needle: &'static str,
    hit: f32,
    miss: f32,
}

#[async_trait]
impl CrossEncoder for NeedleEncoder {
    async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(passages
            .iter()
            .map(|p| if p.contains(self.needle) { self.hit } else { self.miss })
            .collect())
    }

    fn model_name(&self) -> &str {
        "needle"
    }
}

struct FailingEncoder;

#[async_trait]
impl CrossEncoder for FailingEncoder {
    async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
        Err(EngineError::Reranker {
            message: "service offline".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Counts completion calls on top of an inner client
struct CountingCompletion {
    inner: MockCompletion,
    calls: AtomicUsize,
}

impl CountingCompletion {
    fn new(inner: MockCompletion) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for CountingCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.complete(system, prompt).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Cancels the token on its first call, then answers normally
struct CancelingCompletion {
    token: CancelToken,
    response: String,
}

#[async_trait]
impl CompletionClient for CancelingCompletion {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.token.cancel();
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "canceling"
    }
}

fn record(doc: Uuid, idx: u32, text: &str, provenance: Provenance) -> ChunkRecord {
    ChunkRecord {
        key: ChunkKey::new(doc, idx),
        page: idx + 1,
        text: text.to_string(),
        provenance,
    }
}

async fn snapshot_for(records: Vec<ChunkRecord>) -> CorpusSnapshot {
    let embedder = TopicEmbedder;
    let mut embeddings = Vec::with_capacity(records.len());
    for r in &records {
        embeddings.push((r.key, embedder.embed(&r.text).await.unwrap()));
    }
    CorpusSnapshot {
        semantic: Arc::new(InMemoryVectorIndex::new(embeddings)),
        keyword: Arc::new(InMemoryKeywordIndex::new(&records)),
        store: Arc::new(InMemoryChunkStore::new(records)),
    }
}

async fn provider_with_workspace(records: Vec<ChunkRecord>) -> Arc<InMemoryCorpusProvider> {
    let provider = Arc::new(InMemoryCorpusProvider::new());
    let snapshot = snapshot_for(records).await;
    provider.insert_workspace(WORKSPACE, Arc::new(SnapshotCell::new(snapshot)));
    provider
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rewrite.use_llm_rewrites = false;
    config
}

fn sufficient_response(cited: &str) -> String {
    format!(
        r#"{{"answer": "TRL is a maturity scale.", "reasoning": "Defined in the evidence.",
            "context_verdict": "SUFFICIENT", "missing_info": "", "cited_evidence": [{}]}}"#,
        cited
    )
}

#[tokio::test]
async fn test_acronym_query_answered_first_pass() {
    // The corpus spells out the long form; heuristic expansion bridges
    // the surface-form mismatch without a retry
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always(sufficient_response("1")));
    let encoder = Arc::new(NeedleEncoder {
        needle: "Technology Readiness",
        hit: 0.95,
        miss: 0.2,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion.clone(),
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let answer = engine.submit(query).await.unwrap();

    assert_eq!(answer.verdict, Verdict::Sufficient);
    assert!(answer.confident);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].key.document_id, DOC_PRIMARY);
    assert_eq!(completion.calls(), 1, "no retry should have happened");
}

#[tokio::test]
async fn test_gap_verdict_triggers_hint_directed_retry() {
    // First attempt only finds the overview chunk; the generator
    // reports the gap, and the hint pulls in the test-results chunk
    let provider = provider_with_workspace(vec![
        record(
            DOC_PRIMARY,
            0,
            "The qualification campaign overview lists environments and schedules.",
            Provenance::Private,
        ),
        record(
            DOC_SECONDARY,
            0,
            "Thermal vacuum test results: the unit survived 12 cycles with margin.",
            Provenance::Private,
        ),
    ])
    .await;

    let first = r#"{"answer": "The campaign ran several environments.", "reasoning": "",
        "context_verdict": "GAP", "missing_info": "thermal vacuum test results",
        "cited_evidence": [1]}"#;
    let second = r#"{"answer": "The unit survived 12 thermal vacuum cycles with margin.",
        "reasoning": "", "context_verdict": "SUFFICIENT", "missing_info": "",
        "cited_evidence": [1]}"#;
    let completion = CountingCompletion::new(MockCompletion::new(vec![
        first.to_string(),
        second.to_string(),
    ]));

    let encoder = Arc::new(NeedleEncoder {
        needle: "Thermal vacuum",
        hit: 0.95,
        miss: 0.4,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion.clone(),
    );

    let query = Query::new("Did the qualification campaign pass?", WORKSPACE)
        .with_documents(vec![DOC_PRIMARY, DOC_SECONDARY]);
    let answer = engine.submit(query).await.unwrap();

    assert_eq!(answer.verdict, Verdict::Sufficient);
    assert!(answer.confident);
    assert!(answer.answer.contains("12 thermal vacuum cycles"));
    assert_eq!(
        answer.citations[0].key.document_id,
        DOC_SECONDARY,
        "accepted answer must cite the chunk the retry recovered"
    );
    assert_eq!(completion.calls(), 2, "exactly one retry");
}

#[tokio::test]
async fn test_unanswerable_query_returns_not_found_without_model_calls() {
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Budget allocations for the upcoming fiscal year.",
        Provenance::Private,
    )])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always("should never be called"));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion.clone(),
    );

    let query = Query::new("Explain the cryocooler vibration isolation design", WORKSPACE)
        .with_documents(vec![DOC_PRIMARY]);
    let answer = engine.submit(query).await.unwrap();

    assert_eq!(answer.verdict, Verdict::Empty);
    assert!(!answer.confident);
    assert!(answer.citations.is_empty());
    assert_eq!(
        completion.calls(),
        0,
        "empty evidence must not reach the generator"
    );
}

#[tokio::test]
async fn test_reranker_failure_still_answers() {
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always(sufficient_response("1")));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(Arc::new(FailingEncoder)),
        completion.clone(),
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let answer = engine.submit(query).await.unwrap();

    // Fused keyword score carries acceptance; the failure degrades
    // ordering, not the request
    assert_eq!(answer.verdict, Verdict::Sufficient);
    assert_eq!(answer.citations.len(), 1);
}

#[tokio::test]
async fn test_cancellation_aborts_between_stages() {
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    let token = CancelToken::new();
    // The generator cancels the token and returns a GAP answer; the
    // loop must notice the cancellation at the next boundary instead
    // of retrying
    let completion = Arc::new(CancelingCompletion {
        token: token.clone(),
        response: r#"{"answer": "partial", "context_verdict": "GAP",
            "missing_info": "more detail", "cited_evidence": []}"#
            .to_string(),
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion,
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let result = engine.submit_with_cancel(query, token).await;

    assert!(matches!(result, Err(EngineError::Canceled)));
}

#[tokio::test]
async fn test_pre_canceled_token_rejected_immediately() {
    let provider = provider_with_workspace(vec![]).await;
    let completion = CountingCompletion::new(MockCompletion::always("unused"));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion.clone(),
    );

    let token = CancelToken::new();
    token.cancel();

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let result = engine.submit_with_cancel(query, token).await;

    assert!(matches!(result, Err(EngineError::Canceled)));
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_no_sources_is_a_request_error() {
    let provider = Arc::new(InMemoryCorpusProvider::new());
    let completion = CountingCompletion::new(MockCompletion::always("unused"));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion.clone(),
    );

    let query = Query::new("What is the thermal margin?", WORKSPACE);
    let result = engine.submit(query).await;

    match result {
        Err(e) => assert_eq!(e.code().as_code(), 1002),
        Ok(_) => panic!("expected NoSourcesAvailable"),
    }
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_small_talk_routes_to_direct_chat() {
    let provider = Arc::new(InMemoryCorpusProvider::new());
    let completion = CountingCompletion::new(MockCompletion::always(
        "Hello! Attach a document and ask me about it.",
    ));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion.clone(),
    );

    let answer = engine.submit(Query::new("hi there", WORKSPACE)).await.unwrap();

    assert!(answer.answer.contains("Hello"));
    assert!(answer.confident);
    assert!(answer.citations.is_empty());
    assert_eq!(completion.calls(), 1);
}

#[tokio::test]
async fn test_summarization_route_cites_documents() {
    let provider = provider_with_workspace(vec![
        record(DOC_PRIMARY, 0, "Chapter one covers the mission goals.", Provenance::Private),
        record(DOC_PRIMARY, 1, "Chapter two covers the thermal design.", Provenance::Private),
    ])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always(
        "The report describes mission goals and thermal design.",
    ));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion.clone(),
    );

    let query = Query::new("Summarize this report", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let answer = engine.submit(query).await.unwrap();

    assert!(answer.answer.contains("mission goals"));
    assert!(answer.confident);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].key.document_id, DOC_PRIMARY);
}

#[tokio::test]
async fn test_shared_corpus_augmentation_without_documents() {
    let provider = Arc::new(InMemoryCorpusProvider::new());
    let shared = snapshot_for(vec![record(
        Uuid::from_u128(0xE1),
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Shared,
    )])
    .await;
    provider.set_shared(Arc::new(SnapshotCell::new(shared)));

    let completion = CountingCompletion::new(MockCompletion::always(sufficient_response("1")));
    let encoder = Arc::new(NeedleEncoder {
        needle: "Technology Readiness",
        hit: 0.9,
        miss: 0.2,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion.clone(),
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_shared_corpus();
    let answer = engine.submit(query).await.unwrap();

    assert_eq!(answer.verdict, Verdict::Sufficient);
    assert_eq!(answer.citations[0].provenance, Provenance::Shared);
}

#[tokio::test]
async fn test_retry_budget_bounds_generation_calls() {
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    // Every attempt reports a gap; the loop must stop at
    // max_rewrites + 1 generation calls and return a degraded answer
    let completion = CountingCompletion::new(MockCompletion::always(
        r#"{"answer": "partial answer", "context_verdict": "GAP",
            "missing_info": "something else", "cited_evidence": [1]}"#,
    ));
    let encoder = Arc::new(NeedleEncoder {
        needle: "Technology Readiness",
        hit: 0.95,
        miss: 0.2,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion.clone(),
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let answer = engine.submit(query).await.unwrap();

    assert_eq!(completion.calls(), 3, "max_rewrites(2) + 1 attempts");
    assert!(!answer.confident);
    assert_eq!(answer.verdict, Verdict::Gap);
    assert!(!answer.answer.is_empty());
}

#[tokio::test]
async fn test_identical_queries_yield_identical_answers() {
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always(sufficient_response("1")));
    let encoder = Arc::new(NeedleEncoder {
        needle: "Technology Readiness",
        hit: 0.95,
        miss: 0.2,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion,
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let first = engine.submit(query.clone()).await.unwrap();
    let second = engine.submit(query).await.unwrap();

    assert_eq!(first.answer, second.answer);
    assert_eq!(first.citations, second.citations);
    assert_eq!(first.verdict, second.verdict);
}

#[tokio::test]
async fn test_concurrent_queries_share_one_engine() {
    // The engine is shared across in-flight queries; interleaved
    // awaits on the same instance must not corrupt either result
    let provider = provider_with_workspace(vec![record(
        DOC_PRIMARY,
        0,
        "Technology Readiness Level (TRL) is a scale for assessing technology maturity.",
        Provenance::Private,
    )])
    .await;

    let completion = CountingCompletion::new(MockCompletion::always(sufficient_response("1")));
    let encoder = Arc::new(NeedleEncoder {
        needle: "Technology Readiness",
        hit: 0.95,
        miss: 0.2,
    });
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        Some(encoder),
        completion.clone(),
    );

    let query = Query::new("What is TRL?", WORKSPACE).with_documents(vec![DOC_PRIMARY]);
    let (first, second) = tokio::join!(engine.submit(query.clone()), engine.submit(query));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.verdict, Verdict::Sufficient);
    assert_eq!(second.verdict, Verdict::Sufficient);
    assert_eq!(first.citations, second.citations);
    assert_eq!(completion.calls(), 2);
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let provider = Arc::new(InMemoryCorpusProvider::new());
    let completion = CountingCompletion::new(MockCompletion::always("unused"));
    let engine = QueryEngine::new(
        test_config(),
        provider,
        Arc::new(TopicEmbedder),
        None,
        completion,
    );

    let result = engine.submit(Query::new("   ", WORKSPACE)).await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));
}
