//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. Returns a handle to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "safestream_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "safestream_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "safestream_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "safestream_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "safestream_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "safestream_ws_messages_sent_total";
    pub const WS_EVENTS_SKIPPED: &str = "safestream_ws_events_skipped_total";

    // Video metrics
    pub const UPLOADS_TOTAL: &str = "safestream_uploads_total";
    pub const UPLOAD_BYTES_TOTAL: &str = "safestream_upload_bytes_total";
    pub const STREAM_REQUESTS_TOTAL: &str = "safestream_stream_requests_total";
    pub const LIST_CACHE_TOTAL: &str = "safestream_list_cache_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "safestream_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Events a lagging socket never received.
pub fn record_ws_events_skipped(count: u64) {
    counter!(names::WS_EVENTS_SKIPPED).increment(count);
}

pub fn record_upload(size_bytes: u64) {
    counter!(names::UPLOADS_TOTAL).increment(1);
    counter!(names::UPLOAD_BYTES_TOTAL).increment(size_bytes);
}

/// Record a stream request by response kind (`full`, `partial`, `unsatisfiable`).
pub fn record_stream_request(kind: &'static str) {
    counter!(names::STREAM_REQUESTS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_list_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(names::LIST_CACHE_TOTAL, "result" => result).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Collapse record ids so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";

    for segment in path.split('/') {
        let normalized = match previous {
            "videos" if !segment.is_empty() => ":id",
            "users" if !segment.is_empty() => ":id",
            "uploads" if !segment.is_empty() => ":file",
            _ => segment,
        };
        out.push(normalized);
        previous = if normalized == segment { segment } else { "" };
    }

    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/api/videos"), "/api/videos");
        assert_eq!(
            sanitize_path("/api/videos/5f2b9c1e/stream"),
            "/api/videos/:id/stream"
        );
        assert_eq!(sanitize_path("/api/users/abc"), "/api/users/:id");
        assert_eq!(
            sanitize_path("/uploads/thumbnails/thumb-1.png"),
            "/uploads/:file/thumb-1.png"
        );
    }
}
