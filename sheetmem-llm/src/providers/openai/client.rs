//! OpenAI-compatible chat completion client

use super::types::{ApiError, CompletionRequest, CompletionResponse};
use crate::providers::{invalid_response, request_failed};
use crate::{ChatModel, ModelReply};
use async_trait::async_trait;
use reqwest::Client;
use sheetmem_core::{ChatMessage, LlmError, SheetMemResult};

const PROVIDER: &str = "openai";
const COMPLETIONS_PATH: &str = "chat/completions";

/// Chat completion client for one endpoint and one API key.
pub struct OpenAiChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiChatClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - API root such as `https://api.openai.com/v1`, or the
    ///   full `chat/completions` URL
    /// * `api_key` - Bearer token
    /// * `model` - Model name sent with each request
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Completion endpoint, appending `chat/completions` when the base URL lacks it.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with(COMPLETIONS_PATH) {
            base.to_string()
        } else {
            format!("{}/{}", base, COMPLETIONS_PATH)
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> SheetMemResult<ModelReply> {
        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };
            return Err(request_failed(PROVIDER, status.as_u16(), error_msg));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| invalid_response(PROVIDER, format!("Failed to parse response: {}", e)))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| invalid_response(PROVIDER, "response has no message content"))?;
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        Ok(ModelReply::Text(content))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
