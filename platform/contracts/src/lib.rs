//! # Invoice Contracts
//!
//! Shared data contracts for the invoice pipeline: the invoice entity,
//! the four inter-stage event envelopes, and the validation rules every
//! stage enforces at its boundary.
//!
//! ## Why This Lives in Tier 1
//!
//! Every stage consumes one envelope and produces the next, so the
//! contract types must live below the stages. This crate is a pure
//! leaf: it depends on no adapter and performs no I/O.
//!
//! ## Contents
//!
//! - [`Invoice`] / [`LineItem`] / [`VendorType`]: the extracted entity
//! - [`events`]: `InvoiceUploaded` → `InvoiceConverted` →
//!   `InvoiceClassified` → `InvoiceExtracted`, plus the dead-letter
//!   wrapper shared by all stage DLQs
//! - [`validation`]: schema and business-rule checks in a single pass
//! - [`money`] / [`dates`]: locale-tolerant parsing into exact types

pub mod dates;
pub mod events;
pub mod invoice;
pub mod money;
pub mod validation;

pub use dates::{parse_date, DateOrder, DateParseError};
pub use events::{
    DeadLetter, EnvelopeError, FailureReason, InvoiceClassified, InvoiceConverted,
    InvoiceExtracted, InvoiceUploaded, Provider, Stage,
};
pub use invoice::{Invoice, LineItem, VendorType};
pub use money::{parse_amount, AmountParseError};
pub use validation::{validate_invoice, ValidationError};
