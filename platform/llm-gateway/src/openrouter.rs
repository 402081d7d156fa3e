//! OpenRouter implementation of the LlmExtractor trait

use crate::{LlmError, LlmExtractor, LlmResponse};
use async_trait::async_trait;
use base64::Engine;
use invoice_contracts::Provider;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai";

/// Fallback extraction provider over the OpenRouter
/// chat-completions API. Pages travel as `data:` image URLs.
#[derive(Clone)]
pub struct OpenRouterClient {
    model: String,
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenRouterClient {
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
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[async_trait]
impl LlmExtractor for OpenRouterClient {
    fn provider(&self) -> Provider {
        Provider::Openrouter
    }

    async fn extract(&self, images: &[Vec<u8>], prompt: &str) -> Result<LlmResponse, LlmError> {
        let mut content: Vec<serde_json::Value> = vec![json!({
            "type": "text",
            "text": prompt,
        })];
        for png in images {
            content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!(
                        "data:image/png;base64,{}",
                        base64::engine::general_purpose::STANDARD.encode(png)
                    ),
                }
            }));
        }

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
        });

        let started = Instant::now();
        let response = self
            .http_client
            .post(format!("{}/api/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed provider response: {}", e)))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        tracing::debug!(
            model = %self.model,
            latency_ms,
            "OpenRouter extraction response received"
        );

        Ok(LlmResponse {
            text,
            input_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            latency_ms,
        })
    }
}
