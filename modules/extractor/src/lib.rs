//! Stage 3: LLM extractor.
//!
//! Consumes `InvoiceClassified` and produces `InvoiceExtracted` through
//! a three-attempt loop: primary provider, primary with backoff, then
//! the fallback provider. An extraction is published only when it
//! passes schema and business-rule validation; exhausted extractions
//! leave a sidecar in the failed bucket and dead-letter the inbound
//! message.

pub mod confidence;
pub mod consumer_task;
pub mod dlq;
pub mod orchestrator;
pub mod parse;
pub mod prompts;

pub use confidence::{confidence_score, ConfidenceSignals, DEFAULT_CONFIDENCE};
pub use consumer_task::{run_extractor_consumer, start_extractor_consumer};
pub use orchestrator::{
    handle_invoice_classified, AttemptRecord, ExtractionOutcome, ExtractorContext, ExtractorError,
};
pub use parse::{parse_llm_invoice, strip_code_fences, ParseFailure, ParsedExtraction};
pub use prompts::{template_for, PromptTemplate};
