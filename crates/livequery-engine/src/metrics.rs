//! Metric names recorded by the engine and its hosts.

/// Requests handled (counter, labels: kind, key).
pub const REQUESTS_TOTAL: &str = "livequery_requests_total";
/// Requests that failed (counter, labels: kind, code).
pub const ERRORS_TOTAL: &str = "livequery_errors_total";
/// Request duration seconds (histogram, labels: kind).
pub const REQUEST_DURATION_SECONDS: &str = "livequery_request_duration_seconds";
/// Single broadcasts issued by the fan-out (counter, labels: target).
pub const BROADCASTS_TOTAL: &str = "livequery_broadcasts_total";
/// `batch_broadcast` calls issued by the fan-out (counter, labels: target).
pub const BATCH_BROADCASTS_TOTAL: &str = "livequery_batch_broadcasts_total";
/// Fan-out failures (counter, labels: kind).
pub const FANOUT_FAILURES_TOTAL: &str = "livequery_fanout_failures_total";
/// Fan-out duration seconds (histogram, labels: mutation).
pub const FANOUT_DURATION_SECONDS: &str = "livequery_fanout_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            REQUESTS_TOTAL,
            ERRORS_TOTAL,
            REQUEST_DURATION_SECONDS,
            BROADCASTS_TOTAL,
            BATCH_BROADCASTS_TOTAL,
            FANOUT_FAILURES_TOTAL,
            FANOUT_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
            assert!(name.starts_with("livequery_"));
        }
    }
}
