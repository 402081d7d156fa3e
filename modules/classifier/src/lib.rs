//! Stage 2: vendor classifier.
//!
//! Consumes `InvoiceConverted`, determines the vendor from the source
//! filename, scores scan quality from the first page, archives the
//! source TIFF, and publishes `InvoiceClassified`.

pub mod classify;
pub mod consumer_task;
pub mod dlq;
pub mod handler;
pub mod quality;

pub use classify::vendor_from_object_name;
pub use consumer_task::{run_classifier_consumer, start_classifier_consumer};
pub use handler::{handle_invoice_converted, ClassifierContext, ClassifierError};
pub use quality::{quality_score, QualityError};
