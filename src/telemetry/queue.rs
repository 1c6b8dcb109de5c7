//! Queue operation span helpers.

use tracing::Span;

/// Start a span for one queue workflow.
///
/// `item.id` is declared empty and filled in once the item is known.
pub fn start_queue_span(operation: &'static str) -> Span {
    tracing::info_span!(
        "queue.operation",
        "queue.operation" = operation,
        "item.id" = tracing::field::Empty,
    )
}

/// Attach the item id to a span created by [`start_queue_span`].
pub fn record_item(span: &Span, id: i64) {
    span.record("item.id", id);
}

/// Emit a state transition event inside `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
