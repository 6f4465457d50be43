//! Metric instrument factories for fieldops-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fieldops-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for fieldops-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fieldops-rs")
}

/// Counter: number of jobs created.
/// Labels: `priority`.
pub fn jobs_created() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.jobs.created")
        .with_description("Number of jobs created")
        .build()
}

/// Counter: routing state transitions.
/// Labels: `operation` ("transfer" | "close" | "partial_close" | "delete").
pub fn job_transitions() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.jobs.transitions")
        .with_description("Number of job routing transitions")
        .build()
}

/// Counter: exception records opened.
/// Labels: `kind` ("wrong_information" | "duplicate").
pub fn exceptions_opened() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.exceptions.opened")
        .with_description("Number of exception records opened")
        .build()
}

/// Counter: exception records resolved or confirmed.
/// Labels: `kind`.
pub fn exceptions_resolved() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.exceptions.resolved")
        .with_description("Number of exception records resolved")
        .build()
}

/// Counter: persisted notification rows fanned out.
/// Labels: `kind`.
pub fn notifications_fanned_out() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.notifications.fanned_out")
        .with_description("Number of notification rows created")
        .build()
}

/// Counter: push delivery failures (logged and swallowed).
pub fn push_failures() -> Counter<u64> {
    meter()
        .u64_counter("fieldops.push.failures")
        .with_description("Number of failed push delivery attempts")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fieldops.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
