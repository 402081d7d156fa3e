//! Extraction orchestration: the bounded retry-and-fallback loop.
//!
//! Attempt 1 and 2 use the primary provider (attempt 2 after jittered
//! backoff), the final attempt uses the fallback. Parse and validation
//! failures count as attempt failures exactly like provider errors.
//! On exhaustion the source is copied to the failed bucket next to a
//! sidecar carrying the attempts log, and no downstream event is
//! published.

use crate::confidence::confidence_score;
use crate::parse::{parse_llm_invoice, ParsedExtraction};
use crate::prompts::template_for;
use chrono::Utc;
use event_bus::retry::RetryConfig;
use event_bus::{publish_json, BusError, EventBus};
use invoice_contracts::{
    validate_invoice, EnvelopeError, InvoiceClassified, InvoiceExtracted, Provider,
};
use llm_gateway::{LlmError, LlmExtractor, LlmResponse};
use object_store::{parse_uri, ObjectStore, StoreError};
use observer::{GenerationAttrs, Observer};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub struct ExtractorContext {
    pub store: Arc<dyn ObjectStore>,
    pub bus: Arc<dyn EventBus>,
    pub observer: Arc<dyn Observer>,
    pub primary: Arc<dyn LlmExtractor>,
    pub fallback: Arc<dyn LlmExtractor>,
    pub failed_bucket: String,
    pub extracted_topic: String,
    /// Per-attempt LLM timeout.
    pub attempt_timeout: Duration,
    /// Hard cap on attempts, fallback included.
    pub max_attempts: u32,
    /// Backoff schedule between attempts.
    pub backoff: RetryConfig,
}

/// Infrastructure failures around the attempt loop. Provider and
/// validation failures are not errors here; they consume attempts.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid inbound envelope: {0}")]
    BadEnvelope(#[from] EnvelopeError),

    #[error("unparsable uri '{0}'")]
    BadUri(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl ExtractorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractorError::Store(e) => e.is_retryable(),
            ExtractorError::Bus(_) => true,
            ExtractorError::BadEnvelope(_)
            | ExtractorError::BadUri(_)
            | ExtractorError::Serialization(_) => false,
        }
    }
}

/// One entry of the attempts log; serialized into the failure sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt_index: u32,
    pub provider: Provider,
    pub latency_ms: u64,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened to one classified invoice.
#[derive(Debug)]
pub enum ExtractionOutcome {
    /// Validated and published downstream.
    Published(InvoiceExtracted),
    /// Attempts exhausted; sidecar and failed-bucket copy written.
    Failed { attempts: u32, last_error: String },
}

struct AttemptSuccess {
    parsed: ParsedExtraction,
    provider: Provider,
    llm_latency_ms: u64,
    raw_text: String,
}

/// Process one `InvoiceClassified` event through the attempt loop.
///
/// # Errors
///
/// Only infrastructure failures (store, bus) surface as `Err`; the
/// caller retries the retryable ones. Exhausted extraction attempts are
/// the `Ok(Failed)` outcome; the caller routes those to the DLQ.
pub async fn handle_invoice_classified(
    ctx: &ExtractorContext,
    event: &InvoiceClassified,
) -> Result<ExtractionOutcome, ExtractorError> {
    event.validate()?;
    let started = Instant::now();

    // Pages download in parallel; order is preserved by position.
    let pages = futures::future::try_join_all(event.converted_uris.iter().map(|uri| {
        let store = ctx.store.clone();
        async move {
            let (bucket, key) =
                parse_uri(uri).ok_or_else(|| ExtractorError::BadUri(uri.clone()))?;
            store.read(bucket, key).await.map_err(ExtractorError::from)
        }
    }))
    .await?;

    let template = template_for(event.vendor_type);
    let prompt = template.text();

    let attrs = GenerationAttrs {
        vendor_type: event.vendor_type.to_string(),
        provider: ctx.primary.provider().to_string(),
        template_version: template.version.to_string(),
        page_count: event.page_count,
    };
    let handle = ctx.observer.start_generation("invoice_extraction", &attrs).await;

    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut last_raw_text: Option<String> = None;
    let mut success: Option<AttemptSuccess> = None;

    for attempt_index in 1..=ctx.max_attempts {
        if attempt_index > 1 {
            let backoff = ctx.backoff.backoff_for(attempt_index - 1);
            tracing::debug!(
                attempt_index,
                backoff_ms = backoff.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(backoff).await;
        }

        // The last attempt goes to the fallback provider.
        let client = if attempt_index == ctx.max_attempts && ctx.max_attempts > 1 {
            &ctx.fallback
        } else {
            &ctx.primary
        };
        let provider = client.provider();

        let attempt_started = Instant::now();
        let call: Result<LlmResponse, LlmError> =
            match tokio::time::timeout(ctx.attempt_timeout, client.extract(&pages, &prompt)).await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Transient(format!(
                    "attempt timed out after {}ms",
                    ctx.attempt_timeout.as_millis()
                ))),
            };

        let record = match call {
            Ok(response) => {
                last_raw_text = Some(response.text.clone());

                let checked = parse_llm_invoice(&response.text, event.vendor_type)
                    .map_err(|e| e.to_string())
                    .and_then(|parsed| {
                        validate_invoice(&parsed.invoice, Some(event.vendor_type))
                            .map(|_| parsed)
                            .map_err(|e| e.to_string())
                    });

                let error = checked.as_ref().err().cloned();
                let record = AttemptRecord {
                    attempt_index,
                    provider,
                    latency_ms: response.latency_ms,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    error,
                };

                if let Ok(parsed) = checked {
                    success = Some(AttemptSuccess {
                        parsed,
                        provider,
                        llm_latency_ms: response.latency_ms,
                        raw_text: response.text,
                    });
                }
                record
            }
            Err(llm_error) => AttemptRecord {
                attempt_index,
                provider,
                latency_ms: attempt_started.elapsed().as_millis() as u64,
                input_tokens: None,
                output_tokens: None,
                error: Some(llm_error.to_string()),
            },
        };

        tracing::info!(
            source_uri = %event.source_uri,
            provider = %record.provider,
            attempt_index = record.attempt_index,
            latency_ms = record.latency_ms,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            error = record.error.as_deref(),
            "Extraction attempt finished"
        );
        attempts.push(record);

        if success.is_some() {
            break;
        }
    }

    match success {
        Some(win) => {
            publish_success(ctx, event, win, &attempts, started, &handle).await
        }
        None => {
            let last_error = attempts
                .iter()
                .rev()
                .find_map(|a| a.error.clone())
                .unwrap_or_else(|| "no attempts executed".to_string());

            write_failure_artifacts(ctx, event, &attempts, &last_error, last_raw_text).await?;
            ctx.observer
                .end_generation(&handle, None, Some(&last_error))
                .await;

            tracing::warn!(
                source_uri = %event.source_uri,
                attempts = attempts.len(),
                error = %last_error,
                "Extraction exhausted all attempts"
            );

            Ok(ExtractionOutcome::Failed {
                attempts: attempts.len() as u32,
                last_error,
            })
        }
    }
}

async fn publish_success(
    ctx: &ExtractorContext,
    event: &InvoiceClassified,
    win: AttemptSuccess,
    attempts: &[AttemptRecord],
    started: Instant,
    handle: &observer::GenerationHandle,
) -> Result<ExtractionOutcome, ExtractorError> {
    let confidence = confidence_score(&win.parsed);
    let invoice = win.parsed.invoice;
    let last = attempts.last();

    let extracted = InvoiceExtracted {
        source_uri: event.source_uri.clone(),
        vendor_type: invoice.vendor_type,
        provider: win.provider,
        llm_latency_ms: win.llm_latency_ms,
        total_latency_ms: started.elapsed().as_millis() as u64,
        attempt_count: attempts.len() as u32,
        confidence,
        input_tokens: last.and_then(|a| a.input_tokens),
        output_tokens: last.and_then(|a| a.output_tokens),
        trace_id: handle.trace_id.to_string(),
        content_hash: invoice.content_hash(),
        extracted: invoice,
        event_time: Utc::now(),
    };

    ctx.observer.score(handle, "confidence", confidence).await;
    let message_id = publish_json(ctx.bus.as_ref(), &ctx.extracted_topic, &extracted).await?;
    ctx.observer
        .end_generation(handle, Some(&win.raw_text), None)
        .await;

    tracing::info!(
        source_uri = %event.source_uri,
        invoice_id = %extracted.extracted.invoice_id,
        provider = %extracted.provider,
        attempt_count = extracted.attempt_count,
        confidence,
        message_id = %message_id,
        "Extraction published"
    );

    Ok(ExtractionOutcome::Published(extracted))
}

/// Sidecar plus source copy in the failed bucket. Keys derive from the
/// source stem, so redelivered failures overwrite their own artifacts.
async fn write_failure_artifacts(
    ctx: &ExtractorContext,
    event: &InvoiceClassified,
    attempts: &[AttemptRecord],
    last_error: &str,
    last_raw_text: Option<String>,
) -> Result<(), ExtractorError> {
    let (source_bucket, source_key) = parse_uri(&event.source_uri)
        .ok_or_else(|| ExtractorError::BadUri(event.source_uri.clone()))?;
    let file_name = source_key.rsplit('/').next().unwrap_or(source_key);
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);

    let sidecar = serde_json::json!({
        "source_uri": event.source_uri,
        "vendor_type": event.vendor_type,
        "failed_at": Utc::now(),
        "last_error": last_error,
        "last_raw_text": last_raw_text,
        "attempts": attempts,
    });
    let body =
        serde_json::to_vec(&sidecar).map_err(|e| ExtractorError::Serialization(e.to_string()))?;

    ctx.store
        .write(
            &ctx.failed_bucket,
            &format!("{}.json", stem),
            body,
            "application/json",
        )
        .await?;

    ctx.store
        .copy(source_bucket, source_key, &ctx.failed_bucket, file_name)
        .await?;

    Ok(())
}
