//! Prometheus metrics for the HTTP surface.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "postdesk_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "postdesk_http_request_duration_seconds";
const HTTP_REQUESTS_IN_FLIGHT: &str = "postdesk_http_requests_in_flight";
const RATE_LIMIT_HITS_TOTAL: &str = "postdesk_rate_limit_hits_total";

/// Install the global Prometheus recorder; the handle renders `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("install Prometheus recorder")
}

/// Per-request counter and latency histogram.
///
/// Route paths carry no embedded IDs (record selection travels in the `pid`
/// query parameter), so the raw path is a bounded label.
fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    counter!(RATE_LIMIT_HITS_TOTAL, "endpoint" => endpoint.to_string()).increment(1);
}

/// Track in-flight requests and record totals as each response completes.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
