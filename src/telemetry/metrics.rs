//! Metric instrument factories for assignq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("assignq")
}

/// Counter: items submitted.
/// Labels: `result` ("ok" | "error").
pub fn items_submitted() -> Counter<u64> {
    meter()
        .u64_counter("assignq.items.submitted")
        .with_description("Number of items submitted")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "empty" | "error").
pub fn item_claims() -> Counter<u64> {
    meter()
        .u64_counter("assignq.items.claims")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: edit-and-assign attempts.
/// Labels: `result` ("ok" | "error" | "compensated").
pub fn item_edits() -> Counter<u64> {
    meter()
        .u64_counter("assignq.items.edits")
        .with_description("Number of edit-and-assign attempts")
        .build()
}

/// Counter: claims returned to the queue.
/// Labels: `reason` ("explicit" | "lease").
pub fn items_released() -> Counter<u64> {
    meter()
        .u64_counter("assignq.items.released")
        .with_description("Number of claims released back to the queue")
        .build()
}

/// Counter: blobs written whose ledger row was never created.
pub fn orphaned_blobs() -> Counter<u64> {
    meter()
        .u64_counter("assignq.content.orphaned_blobs")
        .with_description("Blobs left without a ledger row")
        .build()
}

/// Counter: ledger/content disagreements.
/// Labels: `operation`.
pub fn consistency_faults() -> Counter<u64> {
    meter()
        .u64_counter("assignq.consistency_faults")
        .with_description("Ledger rows whose content could not be reconciled")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("assignq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
