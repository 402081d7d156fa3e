//! Consumer task wiring the converter handler to the bus.

use crate::dlq::route_to_dlq;
use crate::handler::{handle_invoice_uploaded, ConverterContext};
use event_bus::retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use invoice_contracts::{FailureReason, InvoiceUploaded};
use object_store::{object_uri, ObjectStore};
use pipeline_config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Upper bound on one message's processing, including store I/O.
const STAGE_DEADLINE: Duration = Duration::from_secs(60);

/// Spawn the converter consumer as a background task.
pub fn start_converter_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ObjectStore>,
    config: Arc<PipelineConfig>,
) {
    tokio::spawn(async move {
        run_converter_consumer(bus, store, config).await;
    });
}

/// Run the converter consumer until the subscription ends.
///
/// Exposed separately so tests and the CLI can drive the loop without
/// spawning.
pub async fn run_converter_consumer(
    bus: Arc<dyn EventBus>,
    store: Arc<dyn ObjectStore>,
    config: Arc<PipelineConfig>,
) {
    tracing::info!("Starting converter consumer");

    let subject = config.topics.uploaded.clone();
    let stream = match bus.subscribe(&subject).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
            return;
        }
    };
    tracing::info!(subject = %subject, "Subscribed");

    let ctx = Arc::new(ConverterContext {
        store,
        bus: bus.clone(),
        processed_bucket: config.buckets.processed.clone(),
        converted_topic: config.topics.converted.clone(),
    });
    let retry_config = RetryConfig::default();
    let concurrency = config.concurrency.converter.max(1);

    stream
        .for_each_concurrent(concurrency, |msg| {
            let ctx = ctx.clone();
            let retry_config = retry_config.clone();
            async move {
                process_message(&ctx, &msg, &retry_config).await;
            }
        })
        .await;

    tracing::warn!("Converter consumer stopped");
}

async fn process_message(ctx: &ConverterContext, msg: &BusMessage, retry_config: &RetryConfig) {
    let event: InvoiceUploaded = match serde_json::from_slice(&msg.payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(
                subject = %msg.subject,
                message_id = %msg.message_id,
                error = %e,
                "Failed to parse InvoiceUploaded envelope"
            );
            return;
        }
    };

    let source_uri = object_uri(&event.bucket, &event.object_name);
    let span = tracing::info_span!(
        "convert_invoice",
        source_uri = %source_uri,
        message_id = %msg.message_id
    );

    async {
        let original = serde_json::to_value(&event).unwrap_or_default();

        let result = retry_with_backoff(
            || {
                let ctx = ctx;
                let event = event.clone();
                let source_uri = source_uri.clone();
                let original = original.clone();
                async move {
                    let outcome =
                        tokio::time::timeout(STAGE_DEADLINE, handle_invoice_uploaded(ctx, &event))
                            .await;
                    match outcome {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) if e.is_retryable() => Err(e.to_string()),
                        Ok(Err(e)) => {
                            // Invalid input: fail-route immediately, no retry.
                            route_to_dlq(
                                ctx.bus.as_ref(),
                                FailureReason::InvalidImage,
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
            "converter_consumer",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::synth_tiff;
    use event_bus::{publish_json, InMemoryBus};
    use invoice_contracts::{DeadLetter, InvoiceConverted, Stage};
    use object_store::InMemoryStore;
    use pipeline_config::PipelineConfig;
    use serial_test::serial;

    fn test_config() -> Arc<PipelineConfig> {
        std::env::set_var("PROJECT_ID", "test");
        std::env::set_var("REGION", "local");
        Arc::new(PipelineConfig::from_env().unwrap())
    }

    #[tokio::test]
    #[serial]
    async fn end_to_end_uploaded_to_converted() {
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(InMemoryStore::new());
        let config = test_config();

        let mut converted = bus.subscribe("invoices.converted").await.unwrap();

        store
            .write(
                "invoices-landing",
                "grubhub_INV-7.tiff",
                synth_tiff(&[(12, 12, 90)]),
                "image/tiff",
            )
            .await
            .unwrap();

        start_converter_consumer(bus.clone(), store.clone(), config);
        tokio::time::sleep(Duration::from_millis(50)).await;

        publish_json(
            bus.as_ref(),
            "invoices.uploaded",
            &InvoiceUploaded::new("invoices-landing", "grubhub_INV-7.tiff"),
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), converted.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let event: InvoiceConverted = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(event.page_count, 1);
        assert_eq!(
            event.converted_uris[0],
            "s3://invoices-processed/grubhub_INV-7_page1.png"
        );
    }

    #[tokio::test]
    #[serial]
    async fn corrupted_tiff_goes_to_dlq_without_output() {
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(InMemoryStore::new());
        let config = test_config();

        let mut converted = bus.subscribe("invoices.converted").await.unwrap();
        let mut dlq = bus.subscribe("invoices.dlq.converter").await.unwrap();

        store
            .write("invoices-landing", "zero.tiff", vec![], "image/tiff")
            .await
            .unwrap();

        start_converter_consumer(bus.clone(), store.clone(), config);
        tokio::time::sleep(Duration::from_millis(50)).await;

        publish_json(
            bus.as_ref(),
            "invoices.uploaded",
            &InvoiceUploaded::new("invoices-landing", "zero.tiff"),
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), dlq.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let dead: DeadLetter = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(dead.stage, Stage::Converter);
        assert_eq!(dead.reason, FailureReason::InvalidImage);
        assert_eq!(dead.attempts, 1);

        // No PNGs, no downstream event.
        assert!(store.keys_in("invoices-processed").await.is_empty());
        let no_event = tokio::time::timeout(Duration::from_millis(200), converted.next()).await;
        assert!(no_event.is_err());
    }
}
