//! Consumer task wiring the classifier handler to the bus.

use crate::dlq::route_to_dlq;
use crate::handler::{handle_invoice_converted, ClassifierContext};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use invoice_contracts::{FailureReason, InvoiceConverted};
use object_store::ObjectStore;
use pipeline_config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Upper bound on one message's processing, including store I/O.
const STAGE_DEADLINE: Duration = Duration::from_secs(60);

/// Spawn the classifier consumer as a background task.
pub fn start_classifier_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ObjectStore>,
    config: Arc<PipelineConfig>,
) {
    tokio::spawn(async move {
        run_classifier_consumer(bus, store, config).await;
    });
}

/// Run the classifier consumer until the subscription ends.
pub async fn run_classifier_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ObjectStore>,
    config: Arc<PipelineConfig>,
) {
    tracing::info!("Starting classifier consumer");

    let subject = config.topics.converted.clone();
    let stream = match bus.subscribe(&subject).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
            return;
        }
    };
    tracing::info!(subject = %subject, "Subscribed");

    let ctx = Arc::new(ClassifierContext {
        store,
        bus: bus.clone(),
        archive_bucket: config.buckets.archive.clone(),
        classified_topic: config.topics.classified.clone(),
    });
    let retry_config = RetryConfig::default();
    let concurrency = config.concurrency.classifier.max(1);

    stream
        .for_each_concurrent(concurrency, |msg| {
            let ctx = ctx.clone();
            let retry_config = retry_config.clone();
            async move {
                process_message(&ctx, &msg, &retry_config).await;
            }
        })
        .await;

    tracing::warn!("Classifier consumer stopped");
}

async fn process_message(ctx: &ClassifierContext, msg: &BusMessage, retry_config: &RetryConfig) {
    let event: InvoiceConverted = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                message_id = %msg.message_id,
                error = %e,
                "Failed to parse InvoiceConverted envelope"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "classify_invoice",
        source_uri = %event.source_uri,
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
                    let outcome =
                        tokio::time::timeout(STAGE_DEADLINE, handle_invoice_converted(ctx, &event))
                            .await;
                    match outcome {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) if e.is_retryable() => Err(e.to_string()),
                        Ok(Err(e)) => {
                            route_to_dlq(
                                ctx.bus.as_ref(),
                                FailureReason::ClassificationFailed,
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
            "classifier_consumer",
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
