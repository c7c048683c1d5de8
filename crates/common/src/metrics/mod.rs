//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming. Every name carries
//! [`METRICS_PREFIX`].

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Integrity Assistant metrics
pub const METRICS_PREFIX: &str = "integrity";

/// Histogram buckets for end-to-end query latency (in seconds)
pub const QUERY_BUCKETS: &[f64] = &[
    0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 20.00, 45.00,
];

/// Buckets for single backend calls
pub const BACKEND_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Questions answered, by terminal state"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
    );

    describe_counter!(
        format!("{}_backend_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Backend calls by backend, operation and outcome"
    );

    describe_histogram!(
        format!("{}_backend_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Backend call latency in seconds"
    );

    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retried idempotent requests"
    );

    describe_counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Language model requests"
    );

    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Tokens consumed by language model requests"
    );

    describe_counter!(
        format!("{}_grounding_violations_total", METRICS_PREFIX),
        Unit::Count,
        "Generated answers containing uncited sentences"
    );

    describe_counter!(
        format!("{}_partial_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Answers returned with incomplete coverage"
    );

    describe_counter!(
        format!("{}_sync_documents_total", METRICS_PREFIX),
        Unit::Count,
        "Documents refreshed in the synced index"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a finished question
pub fn record_query(duration_secs: f64, state: &str, query_type: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "state" => state.to_string(),
        "query_type" => query_type.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "state" => state.to_string()
    )
    .record(duration_secs);
}

/// Record one backend call
pub fn record_backend_call(backend: &str, operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_backend_calls_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_backend_call_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_retry(operation: &str) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a language model request and its token usage
pub fn record_generation(stage: &str, model: &str, tokens: u64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if tokens > 0 {
        counter!(
            format!("{}_generation_tokens_total", METRICS_PREFIX),
            "stage" => stage.to_string(),
            "model" => model.to_string()
        )
        .increment(tokens);
    }
}

pub fn record_grounding_violation(outcome: &str) {
    counter!(
        format!("{}_grounding_violations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_partial_answer() {
    counter!(format!("{}_partial_answers_total", METRICS_PREFIX)).increment(1);
}

pub fn record_sync(backend: &str, refreshed: usize) {
    counter!(
        format!("{}_sync_documents_total", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .increment(refreshed as u64);
}
