pub mod anthropic;
pub mod groq;
pub mod openai;
mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::AdapterError;
use crate::types::{ChatRequest, ChatResponse, StreamChunk};

/// Incremental completion: content/tool-call deltas terminated by a finish
/// signal.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AdapterError>> + Send>>;

/// Capability contract every provider adapter implements. Pure wire
/// translation — no state, no history, no skill knowledge.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Short provider tag, used for error context.
    fn provider(&self) -> &'static str;

    /// Synchronous single completion.
    async fn create_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, AdapterError>;

    /// Streaming completion.
    async fn create_streaming_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, AdapterError>;

    /// Whether image content blocks may be attached to requests.
    fn supports_images(&self) -> bool {
        false
    }
}

/// Blanket impl so `Box<dyn ChatAdapter>` can be handed to `Agent::new()`.
#[async_trait]
impl ChatAdapter for Box<dyn ChatAdapter> {
    fn provider(&self) -> &'static str {
        (**self).provider()
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, AdapterError> {
        (**self).create_chat_completion(request).await
    }

    async fn create_streaming_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, AdapterError> {
        (**self).create_streaming_chat_completion(request).await
    }

    fn supports_images(&self) -> bool {
        (**self).supports_images()
    }
}

pub use anthropic::AnthropicAdapter;
pub use groq::GroqAdapter;
pub use openai::OpenAiAdapter;
