use async_trait::async_trait;

use super::openai::OpenAiAdapter;
use super::{ChatAdapter, ChatStream};
use crate::error::AdapterError;
use crate::types::{ChatRequest, ChatResponse};

/// Groq adapter. The wire format is OpenAI-compatible, so everything
/// delegates to the OpenAI translation under a different endpoint and
/// provider tag. No image support.
pub struct GroqAdapter {
    inner: OpenAiAdapter,
}

impl GroqAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            inner: OpenAiAdapter::tagged("groq", "https://api.groq.com/openai")
                .with_api_key(api_key),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.inner = self.inner.with_base_url(url);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.inner = self.inner.with_client(client);
        self
    }
}

#[async_trait]
impl ChatAdapter for GroqAdapter {
    fn provider(&self) -> &'static str {
        "groq"
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, AdapterError> {
        self.inner.create_chat_completion(request).await
    }

    async fn create_streaming_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, AdapterError> {
        self.inner.create_streaming_chat_completion(request).await
    }

    fn supports_images(&self) -> bool {
        false
    }
}
