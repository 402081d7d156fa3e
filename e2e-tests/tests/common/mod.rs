//! Shared harness: the whole pipeline over in-memory adapters.
//!
//! All four stage consumers plus the DLQ handler run against one
//! `InMemoryBus`, `InMemoryStore` and `InMemoryWarehouse`; only the LLM
//! is scripted per scenario.

// Each scenario binary uses a different slice of the harness.
#![allow(dead_code)]

use classifier_rs::start_classifier_consumer;
use converter_rs::start_converter_consumer;
use dlq_handler_rs::{start_dlq_consumer, DlqContext};
use event_bus::retry::RetryConfig;
use event_bus::{publish_json, EventBus, InMemoryBus};
use extractor_rs::{start_extractor_consumer, ExtractorContext};
use invoice_contracts::{InvoiceUploaded, Provider};
use llm_gateway::ScriptedExtractor;
use object_store::{InMemoryStore, ObjectStore};
use observer::NoopObserver;
use pipeline_config::PipelineConfig;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tiff::encoder::{colortype, TiffEncoder};
use warehouse::{InMemoryWarehouse, Table};
use writer_rs::{start_writer_consumer, WriterContext};

pub const LANDING: &str = "invoices-landing";
pub const PROCESSED: &str = "invoices-processed";
pub const FAILED: &str = "invoices-failed";

pub struct Pipeline {
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<InMemoryStore>,
    pub warehouse: Arc<InMemoryWarehouse>,
    pub primary: ScriptedExtractor,
    pub fallback: ScriptedExtractor,
}

/// Boot every consumer and give the subscriptions time to attach.
pub async fn start_pipeline() -> Pipeline {
    std::env::set_var("PROJECT_ID", "invoice-pipeline-e2e");
    std::env::set_var("REGION", "local");
    let config = Arc::new(PipelineConfig::from_env().expect("e2e config"));

    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let primary = ScriptedExtractor::new(Provider::Gemini);
    let fallback = ScriptedExtractor::new(Provider::Openrouter);

    start_converter_consumer(bus.clone(), store.clone(), config.clone());
    start_classifier_consumer(bus.clone(), store.clone(), config.clone());

    let extractor_ctx = Arc::new(ExtractorContext {
        store: store.clone(),
        bus: bus.clone(),
        observer: Arc::new(NoopObserver::new()),
        primary: Arc::new(primary.clone()),
        fallback: Arc::new(fallback.clone()),
        failed_bucket: config.buckets.failed.clone(),
        extracted_topic: config.topics.extracted.clone(),
        attempt_timeout: Duration::from_secs(5),
        max_attempts: 3,
        backoff: RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: 0.0,
        },
    });
    start_extractor_consumer(extractor_ctx, bus.clone(), config.clone());

    let writer_ctx = Arc::new(WriterContext {
        warehouse: warehouse.clone(),
    });
    start_writer_consumer(writer_ctx, bus.clone(), config.clone());

    let dlq_ctx = Arc::new(DlqContext {
        warehouse: warehouse.clone(),
    });
    start_dlq_consumer(dlq_ctx, bus.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;

    Pipeline {
        bus,
        store,
        warehouse,
        primary,
        fallback,
    }
}

impl Pipeline {
    /// Drop a TIFF in the landing bucket and publish the upload event.
    pub async fn upload(&self, object_name: &str, tiff: Vec<u8>) {
        self.store
            .write(LANDING, object_name, tiff, "image/tiff")
            .await
            .expect("landing write");
        publish_json(
            self.bus.as_ref(),
            "invoices.uploaded",
            &InvoiceUploaded::new(LANDING, object_name),
        )
        .await
        .expect("upload publish");
    }

    /// Poll until a table holds `expected` rows, panicking on timeout.
    pub async fn await_rows(&self, table: Table, expected: usize) -> Vec<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let rows = self.warehouse.rows_in(table).await;
            if rows.len() >= expected {
                return rows;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for {} rows in {} (have {})",
                    expected,
                    table,
                    rows.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Confirm a table stays at `expected` rows for a settle window.
    pub async fn assert_rows_stay(&self, table: Table, expected: usize) {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let rows = self.warehouse.rows_in(table).await;
        assert_eq!(
            rows.len(),
            expected,
            "table {} moved past {} rows",
            table,
            expected
        );
    }
}

/// In-memory grayscale TIFF; one image per page.
pub fn synth_tiff(pages: usize) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out).unwrap();
        for page in 0..pages {
            let shade = 40 + (page as u8) * 60;
            let data = vec![shade; 32 * 32];
            encoder
                .write_image::<colortype::Gray8>(32, 32, &data)
                .unwrap();
        }
    }
    out.into_inner()
}

/// A schema- and rule-valid Uber Eats payload with `lines` line items.
pub fn valid_ubereats_json(lines: usize) -> String {
    let line_items: Vec<String> = (0..lines)
        .map(|i| {
            format!(
                r#"{{"description":"Order batch {}","quantity":"10","unit_price":"25.00","amount":"250.00"}}"#,
                i + 1
            )
        })
        .collect();
    let subtotal = 250.0 * lines as f64;
    let commission = subtotal * 0.3;
    let tax = subtotal * 0.08;
    let total = subtotal - commission + tax;

    format!(
        r#"{{
            "invoice_id": "UE-2026-000123",
            "vendor_name": "Uber Eats",
            "vendor_type": "ubereats",
            "invoice_date": "01/21/2026",
            "due_date": "02/20/2026",
            "currency": "USD",
            "subtotal": "{subtotal:.2}",
            "tax_amount": "{tax:.2}",
            "commission_rate": "0.3000",
            "commission_amount": "{commission:.2}",
            "total_amount": "{total:.2}",
            "line_items": [{items}]
        }}"#,
        subtotal = subtotal,
        tax = tax,
        commission = commission,
        total = total,
        items = line_items.join(",")
    )
}
