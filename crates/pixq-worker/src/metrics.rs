//! Worker metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    /// Resolved deliveries by outcome.
    pub const DELIVERIES_TOTAL: &str = "pixq_deliveries_total";

    /// Transform wall time in seconds by job type.
    pub const TRANSFORM_SECONDS: &str = "pixq_transform_seconds";

    /// Transforms by job type and result.
    pub const TRANSFORMS_TOTAL: &str = "pixq_transforms_total";

    /// Successors left pending because publishing kept failing.
    pub const SUCCESSOR_PUBLISH_FAILURES_TOTAL: &str = "pixq_successor_publish_failures_total";

    /// Deliveries taken over from stalled consumers.
    pub const CLAIMED_TOTAL: &str = "pixq_claimed_deliveries_total";
}

pub fn record_delivery(outcome: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_transform(job_type: &str, result: &'static str, elapsed: Duration) {
    counter!(
        names::TRANSFORMS_TOTAL,
        "job_type" => job_type.to_string(),
        "result" => result
    )
    .increment(1);

    histogram!(
        names::TRANSFORM_SECONDS,
        "job_type" => job_type.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_successor_publish_failure() {
    counter!(names::SUCCESSOR_PUBLISH_FAILURES_TOTAL).increment(1);
}

pub fn record_claimed() {
    counter!(names::CLAIMED_TOTAL).increment(1);
}
