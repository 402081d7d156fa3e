//! Dead-letter routing for the converter stage.

use event_bus::{publish_json, EventBus};
use invoice_contracts::events::subjects;
use invoice_contracts::{DeadLetter, FailureReason, Stage};

/// Publish a failed message to the converter DLQ.
///
/// Publish failures are logged and swallowed: a dead letter that cannot
/// be delivered must not wedge the consumer loop.
pub async fn route_to_dlq(
    bus: &dyn EventBus,
    reason: FailureReason,
    attempts: u32,
    last_error: &str,
    source_uri: &str,
    original: serde_json::Value,
) {
    let dead = DeadLetter::new(
        Stage::Converter,
        reason,
        attempts,
        last_error,
        source_uri,
        original,
    );
    let subject = subjects::dlq(Stage::Converter);

    match publish_json(bus, &subject, &dead).await {
        Ok(message_id) => {
            tracing::error!(
                source_uri = %source_uri,
                reason = %reason,
                attempts,
                message_id = %message_id,
                error = %last_error,
                "Message routed to converter DLQ"
            );
        }
        Err(e) => {
            tracing::error!(
                source_uri = %source_uri,
                reason = %reason,
                error = %e,
                "Failed to publish dead letter"
            );
        }
    }
}
