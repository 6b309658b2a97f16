//! Metrics and observability utilities
//!
//! Prometheus metric names and recording helpers for the gateway.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Duration;

/// Metrics prefix for all gateway metrics
pub const METRICS_PREFIX: &str = "orderly_gateway";

/// SLO-aligned histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s - upstream timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests received"
    );

    describe_counter!(
        format!("{}_responses_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP responses sent"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by admission control"
    );

    describe_counter!(
        format!("{}_auth_rejections_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by the authorization gate"
    );

    describe_counter!(
        format!("{}_upstream_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Forwarded requests that failed to reach an upstream"
    );

    tracing::info!("Metrics registered");
}

/// Count an inbound request
pub fn record_request(method: &str) {
    counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .increment(1);
}

/// Count a completed response and its latency
pub fn record_response(status: u16, latency: Duration) {
    counter!(
        format!("{}_responses_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Record an admission rejection for a limiter class
pub fn record_rate_limited(class: &'static str) {
    counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        "class" => class
    )
    .increment(1);
}

/// Record an authorization rejection
pub fn record_auth_rejection(reason: &'static str) {
    counter!(
        format!("{}_auth_rejections_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

/// Record a failed forward
pub fn record_upstream_failure(upstream: &str) {
    counter!(
        format!("{}_upstream_failures_total", METRICS_PREFIX),
        "upstream" => upstream.to_string()
    )
    .increment(1);
}
