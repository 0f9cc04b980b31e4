//! Chat completion client used to generate summaries.
//!
//! The endpoint is reached through a relay that injects credentials, so the
//! client itself never carries a secret.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::envelope::{InferenceEnvelope, truncate};
use crate::core::config::AppConfig;
use crate::errors::ChatError;

const MALFORMED_BODY_LOG_CHARS: usize = 2_000;

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Something that turns a prompt into generated text.
#[async_trait]
pub trait Inference: Send + Sync {
    /// # Errors
    ///
    /// Returns `InferenceUnavailable`, `InferenceUnreachable` or
    /// `InferenceMalformed`; never partial text.
    async fn infer(&self, prompt: &str, max_tokens: u32) -> Result<String, ChatError>;
}

/// HTTP client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct InferenceClient {
    http: Client,
    endpoint: String,
    model_name: String,
    stream: bool,
}

impl InferenceClient {
    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client can't be built.
    pub fn new(
        endpoint: String,
        model_name: String,
        timeout: Duration,
        stream: bool,
    ) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            model_name,
            stream,
        })
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client can't be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, ChatError> {
        Self::new(
            config.inference_url.clone(),
            config.inference_model.clone(),
            Duration::from_secs(config.request_timeout_secs),
            config.inference_stream,
        )
    }

    /// Request body: the prompt as a single user message.
    #[must_use]
    pub fn build_request_body(&self, prompt: &str, max_tokens: u32) -> Value {
        json!({
            "model": self.model_name,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "max_tokens": max_tokens,
            "stream": self.stream
        })
    }
}

#[async_trait]
impl Inference for InferenceClient {
    async fn infer(&self, prompt: &str, max_tokens: u32) -> Result<String, ChatError> {
        #[cfg(feature = "debug-logs")]
        info!("Using inference prompt:\n{}", prompt);

        info!(
            endpoint = %self.endpoint,
            estimated_input_tokens = estimate_tokens(prompt),
            max_tokens,
            "Requesting inference"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&self.build_request_body(prompt, max_tokens))
            .send()
            .await
            .inspect_err(|e| warn!("Inference request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|e| {
                format!("Failed to read error response body (status {status}): {e}")
            });
            warn!(status = status.as_u16(), "Inference endpoint returned an error status");
            return Err(ChatError::InferenceUnavailable {
                status: status.as_u16(),
                body: truncate(&error_text, 500),
            });
        }

        let body = response.text().await?;

        let envelope = InferenceEnvelope::detect(&body).inspect_err(|e| {
            error!(
                error = %e,
                body = %truncate(&body, MALFORMED_BODY_LOG_CHARS),
                "Inference response matched no envelope"
            );
        })?;

        let shape = match &envelope {
            InferenceEnvelope::Single(_) => "single",
            InferenceEnvelope::Chunked(_) => "chunked",
        };
        let text = envelope.into_text()?;
        info!(shape, chars = text.chars().count(), "Inference completed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(stream: bool) -> InferenceClient {
        InferenceClient::new(
            "http://127.0.0.1:9/v1/chat/completions".to_string(),
            "tgi".to_string(),
            Duration::from_secs(5),
            stream,
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = client(false).build_request_body("Summarize this", 150);

        assert_eq!(body["model"], "tgi");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["stream"], false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Summarize this");
    }

    #[test]
    fn test_request_body_alternate_stream_variant() {
        assert_eq!(client(true).build_request_body("p", 10)["stream"], true);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 3);
    }
}
