//! Consumer task wiring the extraction orchestrator to the bus.

use crate::dlq::route_to_dlq;
use crate::orchestrator::{handle_invoice_classified, ExtractionOutcome, ExtractorContext};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use invoice_contracts::{FailureReason, InvoiceClassified};
use pipeline_config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Upper bound on one message: three LLM attempts plus backoffs plus
/// store I/O.
const STAGE_DEADLINE: Duration = Duration::from_secs(300);

/// Spawn the extractor consumer as a background task.
pub fn start_extractor_consumer(
    ctx: Arc<ExtractorContext>,
    bus: Arc<dyn EventBus>,
    config: Arc<PipelineConfig>,
) {
    tokio::spawn(async move {
        run_extractor_consumer(ctx, bus, config).await;
    });
}

/// Run the extractor consumer until the subscription ends.
pub async fn run_extractor_consumer(
    ctx: Arc<ExtractorContext>,
    bus: Arc<dyn EventBus>,
    config: Arc<PipelineConfig>,
) {
    tracing::info!("Starting extractor consumer");

    let subject = config.topics.classified.clone();
    let stream = match bus.subscribe(&subject).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
            return;
        }
    };
    tracing::info!(subject = %subject, "Subscribed");

    let retry_config = RetryConfig::default();
    let concurrency = config.concurrency.extractor.max(1);

    stream
        .for_each_concurrent(concurrency, |msg| {
            let ctx = ctx.clone();
            let retry_config = retry_config.clone();
            async move {
                process_message(&ctx, &msg, &retry_config).await;
            }
        })
        .await;

    tracing::warn!("Extractor consumer stopped");
}

async fn process_message(ctx: &ExtractorContext, msg: &BusMessage, retry_config: &RetryConfig) {
    let event: InvoiceClassified = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                message_id = %msg.message_id,
                error = %e,
                "Failed to parse InvoiceClassified envelope"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "extract_invoice",
        source_uri = %event.source_uri,
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
                async move {
                    let outcome = tokio::time::timeout(
                        STAGE_DEADLINE,
                        handle_invoice_classified(ctx, &event),
                    )
                    .await;
                    match outcome {
                        Ok(Ok(ExtractionOutcome::Published(_))) => Ok(()),
                        Ok(Ok(ExtractionOutcome::Failed {
                            attempts,
                            last_error,
                        })) => {
                            route_to_dlq(
                                ctx.bus.as_ref(),
                                FailureReason::ExtractionFailed,
                                attempts,
                                &last_error,
                                &source_uri,
                                original,
                            )
                            .await;
                            Ok(())
                        }
                        Ok(Err(e)) if e.is_retryable() => Err(e.to_string()),
                        Ok(Err(e)) => {
                            route_to_dlq(
                                ctx.bus.as_ref(),
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
            "extractor_consumer",
        )
        .await;

        if let Err(error) = result {
            route_to_dlq(
                ctx.bus.as_ref(),
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
