//! Stage 1 handler: download, render, upload, publish.

use crate::convert::{page_key, source_stem, tiff_to_pngs, ConvertError};
use event_bus::{publish_json, BusError, EventBus};
use invoice_contracts::{EnvelopeError, InvoiceConverted, InvoiceUploaded};
use object_store::{object_uri, ObjectStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Adapters and names the converter needs per instance.
pub struct ConverterContext {
    pub store: Arc<dyn ObjectStore>,
    pub bus: Arc<dyn EventBus>,
    pub processed_bucket: String,
    pub converted_topic: String,
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("invalid inbound envelope: {0}")]
    BadEnvelope(#[from] EnvelopeError),

    #[error(transparent)]
    Invalid(#[from] ConvertError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("conversion task aborted: {0}")]
    Aborted(String),
}

impl ConverterError {
    /// Retryable failures are redelivered; the rest fail-route to the
    /// converter DLQ with reason `invalid_image`.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConverterError::Store(e) => e.is_retryable(),
            ConverterError::Bus(_) | ConverterError::Aborted(_) => true,
            ConverterError::Invalid(_) | ConverterError::BadEnvelope(_) => false,
        }
    }
}

/// Process one `InvoiceUploaded` event.
///
/// Downloads the TIFF, renders every page to PNG in physical order,
/// uploads `{source_stem}_page{n}.png` (1-indexed) to the processed
/// bucket, and publishes `InvoiceConverted` with the URIs in page
/// order. Output keys are deterministic, so redelivery overwrites the
/// same objects with identical bytes.
pub async fn handle_invoice_uploaded(
    ctx: &ConverterContext,
    event: &InvoiceUploaded,
) -> Result<InvoiceConverted, ConverterError> {
    event.validate()?;

    let source_uri = object_uri(&event.bucket, &event.object_name);
    let bytes = ctx.store.read(&event.bucket, &event.object_name).await?;

    // Page decoding is CPU-bound; keep it off the runtime workers.
    let pages = tokio::task::spawn_blocking(move || tiff_to_pngs(&bytes))
        .await
        .map_err(|e| ConverterError::Aborted(e.to_string()))??;

    let stem = source_stem(&event.object_name).to_string();
    let mut converted_uris = Vec::with_capacity(pages.len());
    for (index, png) in pages.into_iter().enumerate() {
        let key = page_key(&stem, index + 1);
        let uri = ctx
            .store
            .write(&ctx.processed_bucket, &key, png, "image/png")
            .await?;
        converted_uris.push(uri);
    }

    let converted = InvoiceConverted::new(source_uri.clone(), converted_uris);
    let message_id = publish_json(ctx.bus.as_ref(), &ctx.converted_topic, &converted).await?;

    tracing::info!(
        source_uri = %source_uri,
        page_count = converted.page_count,
        message_id = %message_id,
        "Invoice converted"
    );

    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::synth_tiff;
    use event_bus::InMemoryBus;
    use futures::StreamExt;
    use object_store::InMemoryStore;

    fn context(store: InMemoryStore, bus: InMemoryBus) -> ConverterContext {
        ConverterContext {
            store: Arc::new(store),
            bus: Arc::new(bus),
            processed_bucket: "invoices-processed".to_string(),
            converted_topic: "invoices.converted".to_string(),
        }
    }

    #[tokio::test]
    async fn converts_and_publishes_in_page_order() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let mut converted_stream = bus.subscribe("invoices.converted").await.unwrap();

        store
            .write(
                "invoices-landing",
                "invoices/2026/01/21/ubereats_INV-1.tiff",
                synth_tiff(&[(20, 20, 50), (20, 20, 150)]),
                "image/tiff",
            )
            .await
            .unwrap();

        let ctx = context(store.clone(), bus);
        let event = InvoiceUploaded::new("invoices-landing", "invoices/2026/01/21/ubereats_INV-1.tiff");
        let converted = handle_invoice_uploaded(&ctx, &event).await.unwrap();

        assert_eq!(converted.page_count, 2);
        assert_eq!(
            converted.converted_uris,
            vec![
                "s3://invoices-processed/ubereats_INV-1_page1.png".to_string(),
                "s3://invoices-processed/ubereats_INV-1_page2.png".to_string(),
            ]
        );

        // PNGs landed with the right content type.
        assert_eq!(
            store
                .content_type_of("invoices-processed", "ubereats_INV-1_page1.png")
                .await
                .unwrap(),
            "image/png"
        );

        // Downstream envelope matches what the handler returned.
        let msg = converted_stream.next().await.unwrap();
        let published: InvoiceConverted = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(published, converted);
    }

    #[tokio::test]
    async fn redelivery_overwrites_same_keys() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        store
            .write(
                "invoices-landing",
                "a.tiff",
                synth_tiff(&[(10, 10, 7)]),
                "image/tiff",
            )
            .await
            .unwrap();

        let ctx = context(store.clone(), bus);
        let event = InvoiceUploaded::new("invoices-landing", "a.tiff");
        handle_invoice_uploaded(&ctx, &event).await.unwrap();
        handle_invoice_uploaded(&ctx, &event).await.unwrap();

        assert_eq!(
            store.keys_in("invoices-processed").await,
            vec!["a_page1.png".to_string()]
        );
    }

    #[tokio::test]
    async fn zero_byte_object_is_invalid_image() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        store
            .write("invoices-landing", "empty.tiff", vec![], "image/tiff")
            .await
            .unwrap();

        let ctx = context(store, bus);
        let event = InvoiceUploaded::new("invoices-landing", "empty.tiff");
        let err = handle_invoice_uploaded(&ctx, &event).await.unwrap_err();
        assert!(matches!(err, ConverterError::Invalid(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_object_is_not_retryable() {
        let ctx = context(InMemoryStore::new(), InMemoryBus::new());
        let event = InvoiceUploaded::new("invoices-landing", "gone.tiff");
        let err = handle_invoice_uploaded(&ctx, &event).await.unwrap_err();
        assert!(matches!(err, ConverterError::Store(StoreError::NotFound(_))));
        assert!(!err.is_retryable());
    }
}
