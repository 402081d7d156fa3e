//! # LLM Gateway
//!
//! The single capability the extractor needs from a language model:
//! turn page images plus a prompt into text. Two implementations —
//! Gemini (primary) and OpenRouter (fallback), are selected by the
//! extractor's attempt counter; no client state is shared between
//! attempts.
//!
//! ## Implementations
//!
//! - **GeminiClient**: Google Generative Language API
//! - **OpenRouterClient**: OpenRouter chat-completions API
//! - **ScriptedExtractor**: deterministic double for tests

mod gemini;
mod openrouter;
mod scripted;

pub use gemini::GeminiClient;
pub use openrouter::OpenRouterClient;
pub use scripted::ScriptedExtractor;

use async_trait::async_trait;
use invoice_contracts::Provider;

/// One model response, with usage when the provider reports it.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Raw model text; the extractor strips fences and parses JSON.
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub latency_ms: u64,
}

/// Errors from LLM providers.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("request rejected by provider: {0}")]
    InvalidRequest(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Transient(_) | LlmError::EmptyResponse
        )
    }

    /// Map an HTTP status plus body into the error taxonomy.
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        let message = truncate(&body, 300);
        match status {
            429 => LlmError::RateLimited(message),
            500..=599 => LlmError::Transient(format!("{}: {}", status, message)),
            400 | 422 => LlmError::InvalidRequest(message),
            _ => LlmError::Api { status, message },
        }
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Structured-extraction capability.
#[async_trait]
pub trait LlmExtractor: Send + Sync {
    /// Which provider this client talks to.
    fn provider(&self) -> Provider;

    /// Submit page images and a prompt; returns the raw model text.
    ///
    /// `images` are PNG-encoded pages in physical page order.
    async fn extract(&self, images: &[Vec<u8>], prompt: &str) -> Result<LlmResponse, LlmError>;
}
