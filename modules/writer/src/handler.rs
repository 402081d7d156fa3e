//! Stage 4 handler: re-validate, dedupe, write.

use crate::rows::{invoice_row, line_item_rows, metrics_row};
use invoice_contracts::{validate_invoice, EnvelopeError, InvoiceExtracted, ValidationError};
use std::sync::Arc;
use thiserror::Error;
use warehouse::{RecordKey, Table, Warehouse, WarehouseError};

pub struct WriterContext {
    pub warehouse: Arc<dyn Warehouse>,
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("invalid inbound envelope: {0}")]
    BadEnvelope(#[from] EnvelopeError),

    /// Should not happen if the extractor is correct; recorded as a
    /// data-contract breach.
    #[error("extracted payload failed re-validation: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl WriterError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WriterError::Warehouse(e) => e.is_retryable(),
            WriterError::BadEnvelope(_) | WriterError::Validation(_) => false,
        }
    }
}

/// What the writer did with one delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    DuplicateSkipped,
}

/// Process one `InvoiceExtracted` event.
///
/// Re-validates the payload (defence in depth), checks the duplicate
/// guard, then inserts into `invoices`, `line_items` and
/// `extraction_metrics` as an ordered best-effort sequence. The inbound
/// bus message id is the dedupe token, so a crash after a partial write
/// is repaired by redelivery: already-applied tables no-op, the rest
/// complete.
pub async fn handle_invoice_extracted(
    ctx: &WriterContext,
    event: &InvoiceExtracted,
    message_id: &str,
) -> Result<WriteOutcome, WriterError> {
    event.validate()?;
    validate_invoice(&event.extracted, Some(event.vendor_type))?;

    let key = RecordKey::new(
        event.extracted.invoice_id.clone(),
        event.vendor_type.as_str(),
    );

    if ctx.warehouse.exists_by_key(Table::Invoices, &key).await? {
        tracing::info!(
            invoice_id = %key.invoice_id,
            vendor_type = %key.vendor_type,
            message_id = %message_id,
            "duplicate skipped"
        );
        return Ok(WriteOutcome::DuplicateSkipped);
    }

    ctx.warehouse
        .insert_rows(Table::Invoices, &[invoice_row(event)], Some(message_id))
        .await?;
    ctx.warehouse
        .insert_rows(Table::LineItems, &line_item_rows(event), Some(message_id))
        .await?;
    ctx.warehouse
        .insert_rows(
            Table::ExtractionMetrics,
            &[metrics_row(event)],
            Some(message_id),
        )
        .await?;

    tracing::info!(
        invoice_id = %key.invoice_id,
        vendor_type = %key.vendor_type,
        line_items = event.extracted.line_items.len(),
        provider = %event.provider,
        confidence = event.confidence,
        "Invoice written to warehouse"
    );

    Ok(WriteOutcome::Written)
}
