//! Metrics and observability utilities
//!
//! Provides metrics-rs counters and histograms with standardized
//! naming for the retrieval pipeline. Exporter wiring is left to the
//! embedding application.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Quarry metrics
pub const METRICS_PREFIX: &str = "quarry";

/// Histogram buckets for pipeline stage latency (in seconds).
/// Retrieval stages are sub-second; model calls dominate the tail.
pub const STAGE_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    15.00, // 15s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of queries submitted to the pipeline"
    );

    describe_counter!(
        format!("{}_rewrite_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of rewrite-retrieve-generate retry cycles"
    );

    describe_counter!(
        format!("{}_degraded_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answers returned with confident = false"
    );

    describe_counter!(
        format!("{}_reranker_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Times the reranker failed and fused ordering was used instead"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency per pipeline stage in seconds"
    );

    describe_histogram!(
        format!("{}_retrieved_candidates", METRICS_PREFIX),
        Unit::Count,
        "Fused candidate count per retrieval pass"
    );
}

/// Record a submitted query, labeled by selected route
pub fn record_query(route: &'static str) {
    counter!(format!("{}_queries_total", METRICS_PREFIX), "route" => route).increment(1);
}

/// Record a rewrite retry cycle
pub fn record_retry() {
    counter!(format!("{}_rewrite_retries_total", METRICS_PREFIX)).increment(1);
}

/// Record a degraded (low-confidence) answer
pub fn record_degraded(reason: &'static str) {
    counter!(format!("{}_degraded_answers_total", METRICS_PREFIX), "reason" => reason)
        .increment(1);
}

/// Record a reranker failure that degraded to fused ordering
pub fn record_reranker_fallback() {
    counter!(format!("{}_reranker_fallbacks_total", METRICS_PREFIX)).increment(1);
}

/// Record fused candidate count for one retrieval pass
pub fn record_candidates(count: usize) {
    histogram!(format!("{}_retrieved_candidates", METRICS_PREFIX)).record(count as f64);
}

/// Timer that records stage latency on drop
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
