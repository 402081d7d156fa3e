//! DLQ handler: audits dead-lettered messages from every stage.
//!
//! Subscribes to the shared DLQ prefix, classifies each failure into
//! the pipeline error taxonomy, and maintains one audit row per
//! `(stage, source_uri)`. There is no automatic retry; re-injection is
//! an operator action.

pub mod consumer_task;
pub mod handler;

pub use consumer_task::{run_dlq_consumer, start_dlq_consumer};
pub use handler::{classify_error, handle_dead_letter, DlqContext, DlqError};
