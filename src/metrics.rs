//! Prometheus metrics for the proxy.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total inbound HTTP requests (counter). Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "b2proxy_http_requests_total";

/// Inbound request duration in seconds (histogram). Labels: method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "b2proxy_http_request_duration_seconds";

/// Upstream requests issued (counter). Labels: status.
pub const UPSTREAM_REQUESTS_TOTAL: &str = "b2proxy_upstream_requests_total";

/// Range requests re-issued because `content-range` was missing (counter).
pub const RANGE_RETRIES_TOTAL: &str = "b2proxy_range_retries_total";

/// Range requests that ran out of attempts (counter).
pub const RANGE_RETRY_EXHAUSTED_TOTAL: &str = "b2proxy_range_retry_exhausted_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total inbound HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "Inbound request duration in seconds (until response headers)"
    );
    describe_counter!(UPSTREAM_REQUESTS_TOTAL, "Total upstream requests by status");
    describe_counter!(
        RANGE_RETRIES_TOTAL,
        "Range requests retried because content-range was missing"
    );
    describe_counter!(
        RANGE_RETRY_EXHAUSTED_TOTAL,
        "Range requests that exhausted their retry attempts"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Path is deliberately not a label: every object key is a distinct path.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method).record(duration);

    response
}

/// Record one upstream exchange.
pub fn record_upstream(status: StatusCode) {
    counter!(UPSTREAM_REQUESTS_TOTAL, "status" => status.as_u16().to_string()).increment(1);
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
