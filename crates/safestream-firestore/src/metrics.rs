//! Persistence metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Store requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "store_requests_total";

    /// Retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "store_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "store_latency_seconds";

    /// Token refreshes, labelled by outcome.
    pub const TOKEN_REFRESH_TOTAL: &str = "store_token_refresh_total";
}

/// Record metrics for a completed request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_token_refresh(ok: bool) {
    counter!(
        names::TOKEN_REFRESH_TOTAL,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}
