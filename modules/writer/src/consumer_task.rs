//! Consumer task wiring the writer handler to the bus.

use crate::dlq::route_to_dlq;
use crate::handler::{handle_invoice_extracted, WriterContext};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use invoice_contracts::{FailureReason, InvoiceExtracted};
use pipeline_config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Upper bound on one message's processing, including warehouse I/O.
const STAGE_DEADLINE: Duration = Duration::from_secs(30);

/// Spawn the writer consumer as a background task.
pub fn start_writer_consumer(
    ctx: Arc<WriterContext>,
    bus: Arc<dyn EventBus>,
    config: Arc<PipelineConfig>,
) {
    tokio::spawn(async move {
        run_writer_consumer(ctx, bus, config).await;
    });
}

/// Run the writer consumer until the subscription ends.
pub async fn run_writer_consumer(
    ctx: Arc<WriterContext>,
    bus: Arc<dyn EventBus>,
    config: Arc<PipelineConfig>,
) {
    tracing::info!("Starting writer consumer");

    let subject = config.topics.extracted.clone();
    let stream = match bus.subscribe(&subject).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
            return;
        }
    };
    tracing::info!(subject = %subject, "Subscribed");

    let retry_config = RetryConfig::default();
    let concurrency = config.concurrency.writer.max(1);

    stream
        .for_each_concurrent(concurrency, |msg| {
            let ctx = ctx.clone();
            let bus = bus.clone();
            let retry_config = retry_config.clone();
            async move {
                process_message(&ctx, bus.as_ref(), &msg, &retry_config).await;
            }
        })
        .await;

    tracing::warn!("Writer consumer stopped");
}

async fn process_message(
    ctx: &WriterContext,
    bus: &dyn EventBus,
    msg: &BusMessage,
    retry_config: &RetryConfig,
) {
    let event: InvoiceExtracted = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                message_id = %msg.message_id,
                error = %e,
                "Failed to parse InvoiceExtracted envelope"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "write_invoice",
        invoice_id = %event.extracted.invoice_id,
        vendor_type = %event.vendor_type,
        message_id = %msg.message_id
    );

    async {
        let original = serde_json::to_value(&event).unwrap_or_default();
        let source_uri = event.source_uri.clone();

        let result = retry_with_backoff(
            || {
                let ctx = ctx;
                let event = event.clone();
                let source_uri = source_uri.clone();
                let original = original.clone();
                let message_id = msg.message_id.clone();
                async move {
                    let outcome = tokio::time::timeout(
                        STAGE_DEADLINE,
                        handle_invoice_extracted(ctx, &event, &message_id),
                    )
                    .await;
                    match outcome {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) if e.is_retryable() => Err(e.to_string()),
                        Ok(Err(e)) => {
                            // Data-contract breach: the extractor let an
                            // invalid payload through.
                            route_to_dlq(
                                bus,
                                FailureReason::ContractBreach,
                                1,
                                &e.to_string(),
                                &source_uri,
                                original,
                            )
                            .await;
                            Ok(())
                        }
                        Err(_) => Err("stage deadline exceeded".to_string()),
                    }
                }
            },
            retry_config,
            "writer_consumer",
        )
        .await;

        if let Err(error) = result {
            route_to_dlq(
                bus,
                FailureReason::RetriesExhausted,
                retry_config.max_attempts,
                &error,
                &source_uri,
                original,
            )
            .await;
        }
    }
    .instrument(span)
    .await;
}
