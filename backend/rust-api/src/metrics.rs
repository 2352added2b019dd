use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
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

    // Row store metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of row store operations",
        &["operation", "table", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Row store operation duration in seconds",
        &["operation", "table"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Question cache
    pub static ref QUESTION_CACHE_SYNCS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "question_cache_syncs_total",
        "Total number of full question cache syncs",
        &["status"]
    )
    .unwrap();

    pub static ref QUESTION_CACHE_SIZE: IntGauge = register_int_gauge!(
        "question_cache_size",
        "Number of active questions held in the local cache"
    )
    .unwrap();

    pub static ref QUESTIONS_IMPORTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "questions_imported_total",
        "Rows processed by CSV imports",
        &["result"]
    )
    .unwrap();

    // Business Metrics
    pub static ref PRACTICE_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "practice_sessions_total",
        "Total number of practice sessions",
        &["mode", "status"]
    )
    .unwrap();

    pub static ref PRACTICE_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "practice_sessions_active",
        "Number of practice sessions held in memory"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["mode", "correct"]
    )
    .unwrap();

    pub static ref EXAM_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_attempts_total",
        "Scheduled test attempt transitions",
        &["event"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
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

/// Helper: track row store operation with metrics
pub async fn track_store_operation<F, T, E>(operation: &str, table: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, table, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, table])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("http_requests_total"));
    }

    #[tokio::test]
    async fn track_store_operation_counts_failures() {
        let before = STORE_OPERATIONS_TOTAL
            .with_label_values(&["select", "metrics_test", "error"])
            .get();

        let result: Result<(), &str> =
            track_store_operation("select", "metrics_test", async { Err("down") }).await;

        assert!(result.is_err());
        let after = STORE_OPERATIONS_TOTAL
            .with_label_values(&["select", "metrics_test", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
