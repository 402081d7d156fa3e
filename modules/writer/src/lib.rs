//! Stage 4: warehouse writer.
//!
//! Consumes `InvoiceExtracted`, re-validates (defence in depth),
//! deduplicates on `(invoice_id, vendor_type)`, and writes the invoice,
//! its line items, and the extraction metrics. The inbound bus message
//! id is the dedupe token, making redelivery a no-op.

pub mod consumer_task;
pub mod dlq;
pub mod handler;
pub mod rows;

pub use consumer_task::{run_writer_consumer, start_writer_consumer};
pub use handler::{handle_invoice_extracted, WriteOutcome, WriterContext, WriterError};
