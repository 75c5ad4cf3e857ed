use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Response store (MongoDB or in-memory)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of response store operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Response store operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Idempotency cache
    pub static ref IDEMPOTENCY_CACHE_RESULTS: CounterVec = register_counter_vec!(
        "idempotency_cache_results",
        "Idempotency cache hits and misses on response saves",
        &["result"]
    )
    .unwrap();

    // Assessment metrics
    pub static ref ATTEMPTS_ACTIVE: IntGauge = register_int_gauge!(
        "assessment_attempts_active",
        "Number of attempts currently in progress"
    )
    .unwrap();

    pub static ref RESPONSES_SAVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_responses_saved_total",
        "Response save outcomes",
        &["outcome"]
    )
    .unwrap();

    pub static ref QUESTIONS_SERVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_questions_served_total",
        "Adaptive questions served by source",
        &["source"]
    )
    .unwrap();

    pub static ref FALLBACK_DEGRADED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_fallback_degraded_total",
        "Fallback draws that had to widen the search",
        &["tier"]
    )
    .unwrap();

    pub static ref DIFFICULTY_CHANGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_difficulty_changes_total",
        "Difficulty adjustments after graded answers",
        &["direction"]
    )
    .unwrap();

    pub static ref VALIDATION_FLAGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_validation_flags_total",
        "Integrity warnings raised in section reports",
        &["code"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track response store operation with metrics
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_cache_hit() {
    IDEMPOTENCY_CACHE_RESULTS.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    IDEMPOTENCY_CACHE_RESULTS.with_label_values(&["miss"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = QUESTIONS_SERVED_TOTAL.with_label_values(&["fallback"]).get();
    }

    #[test]
    fn test_render_metrics() {
        VALIDATION_FLAGS_TOTAL
            .with_label_values(&["TOO_FAST"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("assessment_validation_flags_total"));
    }

    #[tokio::test]
    async fn track_db_operation_passes_result_through() {
        let ok: Result<u8, String> =
            track_db_operation("get", "test_collection", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u8, String> =
            track_db_operation("get", "test_collection", async { Err("down".to_string()) })
                .await;
        assert!(err.is_err());
    }
}
