//! Gemini implementation of the LlmExtractor trait

use crate::{LlmError, LlmExtractor, LlmResponse};
use async_trait::async_trait;
use base64::Engine;
use invoice_contracts::Provider;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Primary extraction provider over the Generative Language API.
///
/// Pages are sent as inline PNG parts followed by the prompt text;
/// `response_mime_type` asks the model for bare JSON so fenced output
/// is the exception rather than the rule.
#[derive(Clone)]
pub struct GeminiClient {
    model: String,
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client,
        })
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[async_trait]
impl LlmExtractor for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn extract(&self, images: &[Vec<u8>], prompt: &str) -> Result<LlmResponse, LlmError> {
        let mut parts: Vec<serde_json::Value> = images
            .iter()
            .map(|png| {
                json!({
                    "inline_data": {
                        "mime_type": "image/png",
                        "data": base64::engine::general_purpose::STANDARD.encode(png),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": prompt }));

        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": 0.0,
                "response_mime_type": "application/json",
            },
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let started = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed provider response: {}", e)))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let text: String = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = parsed.usage_metadata;
        tracing::debug!(
            model = %self.model,
            latency_ms,
            "Gemini extraction response received"
        );

        Ok(LlmResponse {
            text,
            input_tokens: usage.as_ref().and_then(|u| u.prompt_token_count),
            output_tokens: usage.as_ref().and_then(|u| u.candidates_token_count),
            latency_ms,
        })
    }
}
