//! Inter-stage event contracts.
//!
//! One envelope per pipeline edge, immutable once published, all fields
//! snake_case JSON with `event_time` assigned by the producer. Each
//! consumer validates the inbound envelope before dispatching.

use crate::invoice::{Invoice, VendorType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default bus subjects. Deployments can override these through config;
/// the semantics (one subject per edge, one DLQ per stage) are fixed.
pub mod subjects {
    use super::Stage;

    pub const UPLOADED: &str = "invoices.uploaded";
    pub const CONVERTED: &str = "invoices.converted";
    pub const CLASSIFIED: &str = "invoices.classified";
    pub const EXTRACTED: &str = "invoices.extracted";

    /// All stage DLQs live under this prefix so one consumer can watch
    /// `invoices.dlq.>`.
    pub const DLQ_PREFIX: &str = "invoices.dlq";

    pub fn dlq(stage: Stage) -> String {
        format!("{}.{}", DLQ_PREFIX, stage)
    }
}

/// LLM provider that produced an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Openrouter,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Openrouter => "openrouter",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage, used for DLQ routing and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Converter,
    Classifier,
    Extractor,
    Writer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Converter => "converter",
            Stage::Classifier => "classifier",
            Stage::Extractor => "extractor",
            Stage::Writer => "writer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was routed to a stage DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidImage,
    ClassificationFailed,
    ExtractionFailed,
    ContractBreach,
    /// Transient failure that outlived every redelivery attempt.
    RetriesExhausted,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidImage => "invalid_image",
            FailureReason::ClassificationFailed => "classification_failed",
            FailureReason::ExtractionFailed => "extraction_failed",
            FailureReason::ContractBreach => "contract_breach",
            FailureReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("{field} must be non-empty")]
    EmptyField { field: &'static str },

    #[error("page_count must be >= 1, got {0}")]
    BadPageCount(u32),

    #[error("converted_uris has {uris} entries but page_count is {page_count}")]
    PageCountMismatch { uris: usize, page_count: u32 },

    #[error("{field} must be within [0, 1], got {value}")]
    ScoreOutOfRange { field: &'static str, value: f64 },
}

/// A TIFF landed in the ingestion bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceUploaded {
    pub bucket: String,
    pub object_name: String,
    pub event_time: DateTime<Utc>,
}

impl InvoiceUploaded {
    pub fn new(bucket: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_name: object_name.into(),
            event_time: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        non_empty("bucket", &self.bucket)?;
        non_empty("object_name", &self.object_name)
    }
}

/// Stage 1 output: every page rendered to PNG, in physical page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceConverted {
    pub source_uri: String,
    /// Page PNGs, index i holds physical page i+1.
    pub converted_uris: Vec<String>,
    pub page_count: u32,
    pub event_time: DateTime<Utc>,
}

impl InvoiceConverted {
    pub fn new(source_uri: impl Into<String>, converted_uris: Vec<String>) -> Self {
        let page_count = converted_uris.len() as u32;
        Self {
            source_uri: source_uri.into(),
            converted_uris,
            page_count,
            event_time: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        non_empty("source_uri", &self.source_uri)?;
        if self.page_count < 1 {
            return Err(EnvelopeError::BadPageCount(self.page_count));
        }
        if self.converted_uris.len() != self.page_count as usize {
            return Err(EnvelopeError::PageCountMismatch {
                uris: self.converted_uris.len(),
                page_count: self.page_count,
            });
        }
        for uri in &self.converted_uris {
            non_empty("converted_uris", uri)?;
        }
        Ok(())
    }
}

/// Stage 2 output: vendor verdict, quality score, archive location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceClassified {
    pub source_uri: String,
    pub converted_uris: Vec<String>,
    pub page_count: u32,
    pub vendor_type: VendorType,
    pub quality_score: f64,
    pub archived_uri: String,
    pub event_time: DateTime<Utc>,
}

impl InvoiceClassified {
    pub fn from_converted(
        converted: &InvoiceConverted,
        vendor_type: VendorType,
        quality_score: f64,
        archived_uri: impl Into<String>,
    ) -> Self {
        Self {
            source_uri: converted.source_uri.clone(),
            converted_uris: converted.converted_uris.clone(),
            page_count: converted.page_count,
            vendor_type,
            quality_score,
            archived_uri: archived_uri.into(),
            event_time: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        non_empty("source_uri", &self.source_uri)?;
        non_empty("archived_uri", &self.archived_uri)?;
        if self.page_count < 1 {
            return Err(EnvelopeError::BadPageCount(self.page_count));
        }
        if self.converted_uris.len() != self.page_count as usize {
            return Err(EnvelopeError::PageCountMismatch {
                uris: self.converted_uris.len(),
                page_count: self.page_count,
            });
        }
        unit_interval("quality_score", self.quality_score)
    }
}

/// Stage 3 output: a validated extraction ready for the warehouse.
///
/// Only published when the payload passed schema and business-rule
/// validation; the writer re-validates for defence in depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceExtracted {
    pub source_uri: String,
    pub vendor_type: VendorType,
    pub provider: Provider,
    pub llm_latency_ms: u64,
    /// Wall-clock for the whole extraction including retries.
    pub total_latency_ms: u64,
    pub attempt_count: u32,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Observer trace id, for joining warehouse metrics to traces.
    pub trace_id: String,
    /// SHA-256 of the canonical extracted payload; stable across
    /// re-publication of the same extraction.
    pub content_hash: String,
    pub extracted: Invoice,
    pub event_time: DateTime<Utc>,
}

impl InvoiceExtracted {
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        non_empty("source_uri", &self.source_uri)?;
        non_empty("content_hash", &self.content_hash)?;
        unit_interval("confidence", self.confidence)
    }
}

/// Wrapper carried on every stage DLQ subject: the original envelope
/// plus enough context to audit the failure. No automatic retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub stage: Stage,
    pub reason: FailureReason,
    pub attempts: u32,
    pub last_error: String,
    pub source_uri: String,
    pub original: serde_json::Value,
    pub event_time: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        stage: Stage,
        reason: FailureReason,
        attempts: u32,
        last_error: impl Into<String>,
        source_uri: impl Into<String>,
        original: serde_json::Value,
    ) -> Self {
        Self {
            stage,
            reason,
            attempts,
            last_error: last_error.into(),
            source_uri: source_uri.into(),
            original,
            event_time: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        non_empty("source_uri", &self.source_uri)?;
        non_empty("last_error", &self.last_error)
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.trim().is_empty() {
        return Err(EnvelopeError::EmptyField { field });
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), EnvelopeError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(EnvelopeError::ScoreOutOfRange { field, value });
    }
    Ok(())
}
