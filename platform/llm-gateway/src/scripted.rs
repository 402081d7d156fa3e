//! Deterministic LlmExtractor double for tests and local development.

use crate::{LlmError, LlmExtractor, LlmResponse};
use async_trait::async_trait;
use invoice_contracts::Provider;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

enum ScriptStep {
    Text(String),
    Error(LlmError),
}

/// LlmExtractor that replays a scripted sequence of outcomes.
///
/// Each `extract` call consumes the next step; an exhausted script
/// returns [`LlmError::EmptyResponse`]. Used to drive the retry and
/// fallback paths in extractor and end-to-end tests.
#[derive(Clone)]
pub struct ScriptedExtractor {
    provider: Provider,
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    calls: Arc<AtomicU32>,
}

impl ScriptedExtractor {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue a successful response with the given text.
    pub async fn push_text(&self, text: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(ScriptStep::Text(text.into()));
    }

    /// Queue a failure.
    pub async fn push_error(&self, error: LlmError) {
        self.script.lock().await.push_back(ScriptStep::Error(error));
    }

    /// How many times `extract` was invoked.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmExtractor for ScriptedExtractor {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn extract(&self, _images: &[Vec<u8>], _prompt: &str) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        match self.script.lock().await.pop_front() {
            Some(ScriptStep::Text(text)) => Ok(LlmResponse {
                text,
                input_tokens: Some(1200),
                output_tokens: Some(340),
                latency_ms: 5,
            }),
            Some(ScriptStep::Error(error)) => Err(error),
            None => Err(LlmError::EmptyResponse),
        }
    }
}
