//! Model provider seam and the OpenAI-compatible streaming implementation.

pub mod http;
pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::SandrunError;
use crate::tools::ToolDefinition;
use crate::types::{ModelMessage, StreamEvent};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ProviderRequest {
    pub fn new(messages: Vec<ModelMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self { messages, tools }
    }
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, SandrunError>>;

/// A token-streaming chat model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Start a streamed completion. The stream ends after the provider's
    /// end-of-stream sentinel; a transport failure surfaces as one `Err`
    /// item followed by end of stream.
    async fn stream_chat(&self, request: &ProviderRequest) -> Result<EventStream, SandrunError>;
}
