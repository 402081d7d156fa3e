//! Scenario: every provider attempt fails; the failure leaves a
//! sidecar, a DLQ message, and an audit row, and nothing downstream.

mod common;

use common::{start_pipeline, synth_tiff, FAILED};
use event_bus::EventBus;
use futures::StreamExt;
use invoice_contracts::{DeadLetter, FailureReason, Stage};
use object_store::ObjectStore;
use std::time::Duration;
use warehouse::Table;

#[tokio::test]
async fn exhausted_extraction_fails_loudly_and_publishes_nothing() {
    let pipeline = start_pipeline().await;
    let mut dlq_stream = pipeline
        .bus
        .subscribe("invoices.dlq.extractor")
        .await
        .unwrap();

    // Three unparsable answers: two primary, one fallback.
    pipeline.primary.push_text("{ not json").await;
    pipeline.primary.push_text("{ still not json").await;
    pipeline.fallback.push_text("{ nope").await;

    pipeline
        .upload("doordash_INV-DD-400_20260124.tiff", synth_tiff(1))
        .await;

    // DLQ message arrives with the extraction-failed reason.
    let msg = tokio::time::timeout(Duration::from_secs(10), dlq_stream.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let dead: DeadLetter = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(dead.stage, Stage::Extractor);
    assert_eq!(dead.reason, FailureReason::ExtractionFailed);
    assert_eq!(dead.attempts, 3);

    // Sidecar with the attempts log, next to the source copy.
    let sidecar_bytes = pipeline
        .store
        .read(FAILED, "doordash_INV-DD-400_20260124.json")
        .await
        .expect("sidecar present");
    let sidecar: serde_json::Value = serde_json::from_slice(&sidecar_bytes).unwrap();
    assert_eq!(sidecar["attempts"].as_array().unwrap().len(), 3);
    assert!(pipeline
        .store
        .read(FAILED, "doordash_INV-DD-400_20260124.tiff")
        .await
        .is_ok());

    // The DLQ handler audits the failure.
    let audits = pipeline.await_rows(Table::DlqAudit, 1).await;
    assert_eq!(audits[0]["stage"], "extractor");
    assert_eq!(audits[0]["reason"], "extraction_failed");

    // No warehouse rows, ever.
    pipeline.assert_rows_stay(Table::Invoices, 0).await;
    pipeline.assert_rows_stay(Table::ExtractionMetrics, 0).await;
}
