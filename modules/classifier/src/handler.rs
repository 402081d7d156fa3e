//! Stage 2 handler: classify, score, archive, publish.

use crate::classify::vendor_from_object_name;
use crate::quality::{quality_score, QualityError};
use event_bus::{publish_json, BusError, EventBus};
use invoice_contracts::{EnvelopeError, InvoiceClassified, InvoiceConverted};
use object_store::{parse_uri, ObjectStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

pub struct ClassifierContext {
    pub store: Arc<dyn ObjectStore>,
    pub bus: Arc<dyn EventBus>,
    pub archive_bucket: String,
    pub classified_topic: String,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid inbound envelope: {0}")]
    BadEnvelope(#[from] EnvelopeError),

    #[error("unparsable uri '{0}'")]
    BadUri(String),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ClassifierError {
    /// Archive-copy and store failures are retryable; classification
    /// failures fail-route to the classifier DLQ.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClassifierError::Store(e) => e.is_retryable(),
            ClassifierError::Bus(_) => true,
            ClassifierError::BadEnvelope(_)
            | ClassifierError::BadUri(_)
            | ClassifierError::Quality(_) => false,
        }
    }
}

/// Process one `InvoiceConverted` event.
///
/// Determines the vendor from the source filename, scores scan quality
/// on the first rendered page, copies the source TIFF to the archive
/// bucket (target-overwriting, so redelivery is idempotent) and
/// publishes `InvoiceClassified`.
pub async fn handle_invoice_converted(
    ctx: &ClassifierContext,
    event: &InvoiceConverted,
) -> Result<InvoiceClassified, ClassifierError> {
    event.validate()?;

    let (source_bucket, source_key) = parse_uri(&event.source_uri)
        .ok_or_else(|| ClassifierError::BadUri(event.source_uri.clone()))?;

    let vendor_type = vendor_from_object_name(source_key);

    // Quality is judged on the first page; later pages carry
    // signatures and footers, not the layout we care about.
    let first_page_uri = &event.converted_uris[0];
    let (page_bucket, page_key) = parse_uri(first_page_uri)
        .ok_or_else(|| ClassifierError::BadUri(first_page_uri.clone()))?;
    let png = ctx.store.read(page_bucket, page_key).await?;
    let quality = quality_score(&png)?;

    let archive_key = source_key.rsplit('/').next().unwrap_or(source_key);
    let archived_uri = ctx
        .store
        .copy(source_bucket, source_key, &ctx.archive_bucket, archive_key)
        .await?;

    let classified =
        InvoiceClassified::from_converted(event, vendor_type, quality, archived_uri);
    let message_id = publish_json(ctx.bus.as_ref(), &ctx.classified_topic, &classified).await?;

    tracing::info!(
        source_uri = %event.source_uri,
        vendor_type = %vendor_type,
        quality_score = quality,
        message_id = %message_id,
        "Invoice classified"
    );

    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryBus;
    use futures::StreamExt;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use invoice_contracts::VendorType;
    use object_store::InMemoryStore;
    use std::io::Cursor;

    fn page_png() -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_fn(400, 300, |x, _| {
            image::Luma([if x % 2 == 0 { 30 } else { 220 }])
        }))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
        out
    }

    fn context(store: InMemoryStore, bus: InMemoryBus) -> ClassifierContext {
        ClassifierContext {
            store: Arc::new(store),
            bus: Arc::new(bus),
            archive_bucket: "invoices-archive".to_string(),
            classified_topic: "invoices.classified".to_string(),
        }
    }

    async fn seed(store: &InMemoryStore, object_name: &str) -> InvoiceConverted {
        store
            .write("invoices-landing", object_name, vec![0x49, 0x49], "image/tiff")
            .await
            .unwrap();
        let stem = object_name.rsplit('/').next().unwrap().trim_end_matches(".tiff");
        let page_key = format!("{}_page1.png", stem);
        let uri = store
            .write("invoices-processed", &page_key, page_png(), "image/png")
            .await
            .unwrap();
        InvoiceConverted::new(format!("s3://invoices-landing/{}", object_name), vec![uri])
    }

    #[tokio::test]
    async fn classifies_and_archives() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let mut classified_stream = bus.subscribe("invoices.classified").await.unwrap();

        let event = seed(&store, "invoices/2026/01/21/ifood_INV-BR-9.tiff").await;
        let ctx = context(store.clone(), bus);

        let classified = handle_invoice_converted(&ctx, &event).await.unwrap();
        assert_eq!(classified.vendor_type, VendorType::Ifood);
        assert!(classified.quality_score > 0.0 && classified.quality_score <= 1.0);
        assert_eq!(
            classified.archived_uri,
            "s3://invoices-archive/ifood_INV-BR-9.tiff"
        );

        // Archive copy really happened.
        assert_eq!(
            store.keys_in("invoices-archive").await,
            vec!["ifood_INV-BR-9.tiff".to_string()]
        );

        let msg = classified_stream.next().await.unwrap();
        let published: InvoiceClassified = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(published, classified);
    }

    #[tokio::test]
    async fn unknown_prefix_is_other() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let event = seed(&store, "mystery_scan.tiff").await;
        let ctx = context(store, bus);

        let classified = handle_invoice_converted(&ctx, &event).await.unwrap();
        assert_eq!(classified.vendor_type, VendorType::Other);
    }

    #[tokio::test]
    async fn unreadable_page_is_not_retryable() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        store
            .write("invoices-landing", "rappi_x.tiff", vec![1], "image/tiff")
            .await
            .unwrap();
        store
            .write(
                "invoices-processed",
                "rappi_x_page1.png",
                b"garbage".to_vec(),
                "image/png",
            )
            .await
            .unwrap();

        let event = InvoiceConverted::new(
            "s3://invoices-landing/rappi_x.tiff",
            vec!["s3://invoices-processed/rappi_x_page1.png".to_string()],
        );
        let ctx = context(store, bus);

        let err = handle_invoice_converted(&ctx, &event).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Quality(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_page_surfaces_not_found() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let event = InvoiceConverted::new(
            "s3://invoices-landing/doordash_y.tiff",
            vec!["s3://invoices-processed/doordash_y_page1.png".to_string()],
        );
        let ctx = context(store, bus);

        let err = handle_invoice_converted(&ctx, &event).await.unwrap_err();
        assert!(matches!(err, ClassifierError::Store(StoreError::NotFound(_))));
        assert!(!err.is_retryable());
    }
}
