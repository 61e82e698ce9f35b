//! Metrics middleware for request tracking
//!
//! Records one counter sample and one latency sample per request, labelled by
//! method and status class. Paths are left out of the labels since they are
//! unbounded.

use axum::{body::Body, extract::Request, http::StatusCode, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::time::Instant;

/// Status class label, `2xx` to `5xx`
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Metrics middleware
pub async fn metrics_layer(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().as_str().to_string();

    let response = next.run(request).await;

    let status = status_class(response.status());
    counter!(
        "s3proxy_http_requests_total",
        "method" => method.clone(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "s3proxy_http_request_duration_seconds",
        "method" => method,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());

    response
}
