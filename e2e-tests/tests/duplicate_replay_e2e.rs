//! Scenario: replaying an already-written extraction is a logged no-op.

mod common;

use common::{start_pipeline, synth_tiff, valid_ubereats_json};
use event_bus::EventBus;
use futures::StreamExt;
use std::time::Duration;
use warehouse::Table;

#[tokio::test]
async fn replayed_extraction_writes_nothing_new() {
    let pipeline = start_pipeline().await;
    let mut extracted_stream = pipeline.bus.subscribe("invoices.extracted").await.unwrap();
    pipeline.primary.push_text(valid_ubereats_json(2)).await;

    pipeline
        .upload("ubereats_INV-UE-500_20260125.tiff", synth_tiff(1))
        .await;

    // First pass lands.
    pipeline.await_rows(Table::Invoices, 1).await;
    pipeline.await_rows(Table::LineItems, 2).await;

    // Capture the published envelope and replay it verbatim.
    let msg = tokio::time::timeout(Duration::from_secs(5), extracted_stream.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    pipeline
        .bus
        .publish(
            "invoices.extracted",
            msg.payload.clone(),
            Default::default(),
        )
        .await
        .unwrap();

    // The duplicate guard holds every table still.
    pipeline.assert_rows_stay(Table::Invoices, 1).await;
    pipeline.assert_rows_stay(Table::LineItems, 2).await;
    pipeline.assert_rows_stay(Table::ExtractionMetrics, 1).await;
}
