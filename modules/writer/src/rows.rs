//! Row construction for the warehouse tables.
//!
//! Monetary values travel as strings end to end; the warehouse casts
//! them to NUMERIC at insert time.

use invoice_contracts::InvoiceExtracted;
use serde_json::{json, Value};

/// One `invoices` row for an extracted event.
pub fn invoice_row(event: &InvoiceExtracted) -> Value {
    let invoice = &event.extracted;
    json!({
        "invoice_id": invoice.invoice_id,
        "vendor_type": invoice.vendor_type.as_str(),
        "vendor_name": invoice.vendor_name,
        "invoice_date": invoice.invoice_date.to_string(),
        "due_date": invoice.due_date.to_string(),
        "currency": invoice.currency,
        "subtotal": invoice.subtotal.to_string(),
        "tax_amount": invoice.tax_amount.to_string(),
        "commission_rate": invoice.commission_rate.to_string(),
        "commission_amount": invoice.commission_amount.to_string(),
        "total_amount": invoice.total_amount.to_string(),
        "source_uri": event.source_uri,
        "content_hash": event.content_hash,
    })
}

/// `line_items` rows in statement order; `position` preserves it.
pub fn line_item_rows(event: &InvoiceExtracted) -> Vec<Value> {
    let invoice = &event.extracted;
    invoice
        .line_items
        .iter()
        .enumerate()
        .map(|(index, line)| {
            json!({
                "invoice_id": invoice.invoice_id,
                "vendor_type": invoice.vendor_type.as_str(),
                "position": index as i64 + 1,
                "description": line.description,
                "quantity": line.quantity.to_string(),
                "unit_price": line.unit_price.to_string(),
                "amount": line.amount.to_string(),
            })
        })
        .collect()
}

/// One `extraction_metrics` row for the final extraction outcome.
pub fn metrics_row(event: &InvoiceExtracted) -> Value {
    json!({
        "invoice_id": event.extracted.invoice_id,
        "vendor_type": event.vendor_type.as_str(),
        "provider": event.provider.as_str(),
        "llm_latency_ms": event.llm_latency_ms,
        "total_latency_ms": event.total_latency_ms,
        "attempt_count": event.attempt_count,
        "confidence": event.confidence,
        "input_tokens": event.input_tokens,
        "output_tokens": event.output_tokens,
        "cost_estimate": Value::Null,
        "trace_id": event.trace_id,
        "success": true,
    })
}
