//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder and return the handle that renders it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "pixq_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "pixq_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "pixq_http_requests_in_flight";

    // Intake metrics
    pub const IMAGES_UPLOADED_TOTAL: &str = "pixq_images_uploaded_total";
    pub const JOBS_ENQUEUED_TOTAL: &str = "pixq_jobs_enqueued_total";
    pub const TRANSFORMATIONS_REJECTED_TOTAL: &str = "pixq_transformations_rejected_total";
    pub const QUEUE_LENGTH: &str = "pixq_queue_length";
    pub const DEAD_LETTER_LENGTH: &str = "pixq_dead_letter_length";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_image_uploaded() {
    counter!(names::IMAGES_UPLOADED_TOTAL).increment(1);
}

/// Record a job persisted as part of a chain.
pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_rejected(count: usize) {
    counter!(names::TRANSFORMATIONS_REJECTED_TOTAL).increment(count as u64);
}

pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

pub fn set_dead_letter_length(length: u64) {
    gauge!(names::DEAD_LETTER_LENGTH).set(length as f64);
}

/// Metrics middleware for HTTP requests.
///
/// Labels use the matched route template (`/images/:image_id`) so IDs never
/// become label values.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}
