//! Langfuse-compatible observer over the public ingestion API.

use crate::{GenerationAttrs, GenerationHandle, Observer};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Observer implementation that batches events and ships them to a
/// Langfuse-compatible `/api/public/ingestion` endpoint.
///
/// Sink failures are logged once per process and then swallowed; the
/// buffer is dropped on failure rather than retried so a dead sink can
/// never grow memory or stall a handler.
pub struct LangfuseObserver {
    base_url: String,
    public_key: String,
    secret_key: String,
    http_client: reqwest::Client,
    buffer: Mutex<Vec<Value>>,
    sink_warned: AtomicBool,
}

impl LangfuseObserver {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>, secret_key: impl Into<String>) -> Arc<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            base_url: base_url.into(),
            public_key: public_key.into(),
            secret_key: secret_key.into(),
            http_client,
            buffer: Mutex::new(Vec::new()),
            sink_warned: AtomicBool::new(false),
        })
    }

    async fn push(&self, event: Value) {
        let mut buffer = self.buffer.lock().await;
        buffer.push(event);
    }

    fn event(kind: &str, body: Value) -> Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "type": kind,
            "body": body,
        })
    }

    fn warn_once(&self, error: &dyn std::fmt::Display) {
        if !self.sink_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %error, "Observer sink failed; further failures are silent");
        }
    }

    /// Spawn the periodic background flusher for a process-global
    /// observer instance.
    pub fn spawn_flusher(observer: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                observer.flush().await;
            }
        });
    }
}

#[async_trait]
impl Observer for LangfuseObserver {
    async fn start_generation(&self, name: &str, attrs: &GenerationAttrs) -> GenerationHandle {
        let handle = GenerationHandle::new();
        let now = Utc::now().to_rfc3339();

        self.push(Self::event(
            "trace-create",
            json!({
                "id": handle.trace_id.to_string(),
                "name": name,
                "timestamp": now,
                "metadata": {
                    "vendor_type": attrs.vendor_type,
                    "page_count": attrs.page_count,
                },
            }),
        ))
        .await;

        self.push(Self::event(
            "generation-create",
            json!({
                "id": handle.generation_id.to_string(),
                "traceId": handle.trace_id.to_string(),
                "name": name,
                "startTime": now,
                "model": attrs.provider,
                "metadata": {
                    "vendor_type": attrs.vendor_type,
                    "provider": attrs.provider,
                    "template_version": attrs.template_version,
                    "page_count": attrs.page_count,
                },
            }),
        ))
        .await;

        handle
    }

    async fn end_generation(
        &self,
        handle: &GenerationHandle,
        output: Option<&str>,
        error: Option<&str>,
    ) {
        let mut body = json!({
            "id": handle.generation_id.to_string(),
            "traceId": handle.trace_id.to_string(),
            "endTime": Utc::now().to_rfc3339(),
        });
        if let Some(output) = output {
            body["output"] = json!(output);
        }
        if let Some(error) = error {
            body["level"] = json!("ERROR");
            body["statusMessage"] = json!(error);
        }

        self.push(Self::event("generation-update", body)).await;
    }

    async fn score(&self, handle: &GenerationHandle, name: &str, value: f64) {
        self.push(Self::event(
            "score-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": handle.trace_id.to_string(),
                "observationId": handle.generation_id.to_string(),
                "name": name,
                "value": value,
            }),
        ))
        .await;
    }

    async fn flush(&self) {
        let batch: Vec<Value> = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return;
            }
            buffer.drain(..).collect()
        };

        let batch_len = batch.len();
        let result = self
            .http_client
            .post(format!("{}/api/public/ingestion", self.base_url))
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&json!({ "batch": batch }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(events = batch_len, "Observer batch flushed");
            }
            Ok(response) => {
                self.warn_once(&format!("ingestion returned {}", response.status()));
            }
            Err(e) => {
                self.warn_once(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> GenerationAttrs {
        GenerationAttrs {
            vendor_type: "ifood".to_string(),
            provider: "gemini".to_string(),
            template_version: "v1".to_string(),
            page_count: 2,
        }
    }

    #[tokio::test]
    async fn generation_lifecycle_buffers_events() {
        let observer = LangfuseObserver::new("http://localhost:0", "pk", "sk");

        let handle = observer.start_generation("invoice_extraction", &attrs()).await;
        observer.score(&handle, "confidence", 0.93).await;
        observer
            .end_generation(&handle, Some("{\"invoice_id\":\"A\"}"), None)
            .await;

        let buffer = observer.buffer.lock().await;
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer[0]["type"], "trace-create");
        assert_eq!(buffer[1]["type"], "generation-create");
        assert_eq!(buffer[2]["type"], "score-create");
        assert_eq!(buffer[3]["type"], "generation-update");
        assert_eq!(
            buffer[1]["body"]["metadata"]["template_version"],
            "v1"
        );
    }

    #[tokio::test]
    async fn flush_against_dead_sink_is_silent_and_drops_buffer() {
        // Port 0 is never listening; the send fails immediately.
        let observer = LangfuseObserver::new("http://127.0.0.1:0", "pk", "sk");

        let handle = observer.start_generation("invoice_extraction", &attrs()).await;
        observer.end_generation(&handle, None, Some("boom")).await;

        observer.flush().await;
        assert!(observer.sink_warned.load(Ordering::Relaxed));
        assert!(observer.buffer.lock().await.is_empty());

        // Second flush with empty buffer is a no-op.
        observer.flush().await;
    }

    #[tokio::test]
    async fn error_end_marks_generation() {
        let observer = LangfuseObserver::new("http://localhost:0", "pk", "sk");
        let handle = observer.start_generation("invoice_extraction", &attrs()).await;
        observer.end_generation(&handle, None, Some("parse failure")).await;

        let buffer = observer.buffer.lock().await;
        let update = buffer.last().unwrap();
        assert_eq!(update["body"]["level"], "ERROR");
        assert_eq!(update["body"]["statusMessage"], "parse failure");
    }
}
