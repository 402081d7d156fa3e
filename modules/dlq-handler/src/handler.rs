//! Dead-letter auditing.
//!
//! One audit row per `(stage, source_uri)`; re-arrivals bump the
//! occurrence count and `last_seen`. Messages are never re-injected
//! automatically; operational tooling replays them after human review.

use invoice_contracts::{DeadLetter, EnvelopeError, FailureReason};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use warehouse::{Table, Warehouse, WarehouseError};

pub struct DlqContext {
    pub warehouse: Arc<dyn Warehouse>,
}

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("invalid dead-letter envelope: {0}")]
    BadEnvelope(#[from] EnvelopeError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl DlqError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DlqError::Warehouse(e) => e.is_retryable(),
            DlqError::BadEnvelope(_) => false,
        }
    }
}

/// Bucket a dead letter into the pipeline error taxonomy.
///
/// The reason names what the stage decided; the kind names the class an
/// operator triages by.
pub fn classify_error(reason: FailureReason, last_error: &str) -> &'static str {
    match reason {
        FailureReason::InvalidImage | FailureReason::ClassificationFailed => "invalid_input",
        FailureReason::ContractBreach => "contract_breach",
        FailureReason::RetriesExhausted => "transient",
        FailureReason::ExtractionFailed => {
            let lowered = last_error.to_lowercase();
            if lowered.contains("rate limited")
                || lowered.contains("transient")
                || lowered.contains("timed out")
            {
                "transient"
            } else {
                "validation_failure"
            }
        }
    }
}

/// Persist one audit record for a dead letter.
///
/// `message_id` is the dedupe token: redelivery of the same dead letter
/// does not inflate the occurrence count.
pub async fn handle_dead_letter(
    ctx: &DlqContext,
    dead: &DeadLetter,
    message_id: &str,
) -> Result<(), DlqError> {
    dead.validate()?;

    let error_kind = classify_error(dead.reason, &dead.last_error);
    let row = json!({
        "stage": dead.stage.as_str(),
        "source_uri": dead.source_uri,
        "reason": dead.reason.as_str(),
        "error_kind": error_kind,
        "last_error": dead.last_error,
        "attempts": dead.attempts,
        "first_seen": dead.event_time,
    });

    ctx.warehouse
        .insert_rows(Table::DlqAudit, &[row], Some(message_id))
        .await?;

    tracing::warn!(
        stage = %dead.stage,
        source_uri = %dead.source_uri,
        reason = %dead.reason,
        error_kind,
        attempts = dead.attempts,
        "Dead letter audited"
    );

    Ok(())
}
