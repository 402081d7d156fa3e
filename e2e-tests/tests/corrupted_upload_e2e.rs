//! Scenario: a zero-byte upload dead-letters at the converter and
//! produces no downstream artifacts.

mod common;

use common::{start_pipeline, PROCESSED};
use event_bus::EventBus;
use futures::StreamExt;
use invoice_contracts::{DeadLetter, FailureReason, Stage};
use std::time::Duration;
use warehouse::Table;

#[tokio::test]
async fn zero_byte_tiff_dead_letters_at_the_converter() {
    let pipeline = start_pipeline().await;
    let mut dlq_stream = pipeline
        .bus
        .subscribe("invoices.dlq.converter")
        .await
        .unwrap();
    let mut converted_stream = pipeline.bus.subscribe("invoices.converted").await.unwrap();

    pipeline.upload("ubereats_zero.tiff", Vec::new()).await;

    let msg = tokio::time::timeout(Duration::from_secs(5), dlq_stream.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let dead: DeadLetter = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(dead.stage, Stage::Converter);
    assert_eq!(dead.reason, FailureReason::InvalidImage);

    // Audit row recorded; no PNGs, no downstream events, no LLM calls.
    let audits = pipeline.await_rows(Table::DlqAudit, 1).await;
    assert_eq!(audits[0]["stage"], "converter");
    assert_eq!(audits[0]["error_kind"], "invalid_input");

    assert!(pipeline.store.keys_in(PROCESSED).await.is_empty());
    let no_event = tokio::time::timeout(Duration::from_millis(300), converted_stream.next()).await;
    assert!(no_event.is_err());
    assert_eq!(pipeline.primary.call_count(), 0);
    pipeline.assert_rows_stay(Table::Invoices, 0).await;
}
