//! Consumer over every stage DLQ subject.

use crate::handler::{handle_dead_letter, DlqContext};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use invoice_contracts::events::subjects;
use invoice_contracts::DeadLetter;
use std::sync::Arc;
use tracing::Instrument;

/// Spawn the DLQ audit consumer as a background task.
pub fn start_dlq_consumer(ctx: Arc<DlqContext>, bus: Arc<dyn EventBus>) {
    tokio::spawn(async move {
        run_dlq_consumer(ctx, bus).await;
    });
}

/// Run the DLQ audit consumer until the subscription ends.
///
/// One subscription covers all four stage DLQs via the shared prefix.
pub async fn run_dlq_consumer(ctx: Arc<DlqContext>, bus: Arc<dyn EventBus>) {
    tracing::info!("Starting DLQ audit consumer");

    let pattern = format!("{}.>", subjects::DLQ_PREFIX);
    let stream = match bus.subscribe(&pattern).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(pattern = %pattern, error = %e, "Failed to subscribe");
            return;
        }
    };
    tracing::info!(pattern = %pattern, "Subscribed");

    let retry_config = RetryConfig::default();

    stream
        .for_each_concurrent(4, |msg| {
            let ctx = ctx.clone();
            let retry_config = retry_config.clone();
            async move {
                process_message(&ctx, &msg, &retry_config).await;
            }
        })
        .await;

    tracing::warn!("DLQ audit consumer stopped");
}

async fn process_message(ctx: &DlqContext, msg: &BusMessage, retry_config: &RetryConfig) {
    let dead: DeadLetter = match serde_json::from_slice(&msg.payload) {
        Ok(dead) => dead,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                message_id = %msg.message_id,
                error = %e,
                "Failed to parse dead-letter envelope"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "audit_dead_letter",
        stage = %dead.stage,
        source_uri = %dead.source_uri,
        message_id = %msg.message_id
    );

    async {
        let result = retry_with_backoff(
            || {
                let ctx = ctx;
                let dead = dead.clone();
                let message_id = msg.message_id.clone();
                async move {
                    match handle_dead_letter(ctx, &dead, &message_id).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.is_retryable() => Err(e.to_string()),
                        Err(e) => {
                            // Nothing downstream of the DLQ; log and drop.
                            tracing::error!(error = %e, "Unauditable dead letter dropped");
                            Ok(())
                        }
                    }
                }
            },
            retry_config,
            "dlq_consumer",
        )
        .await;

        if let Err(error) = result {
            tracing::error!(error = %error, "Dead-letter audit failed after retries");
        }
    }
    .instrument(span)
    .await;
}
