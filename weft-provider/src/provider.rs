//! The two provider capabilities the engine depends on.

use crate::error::ProviderError;
use crate::message::{ChatRequest, ChatResponse, StreamEvent};
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A stream of completion events.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Maps text to a unit-norm dense vector of a fixed, known dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text. The returned vector has exactly
    /// [`dimension`](EmbeddingProvider::dimension) entries and L2 norm 1.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// The dimensionality of every vector this provider produces.
    fn dimension(&self) -> usize;
}

/// Text-in / text-out chat completion, optionally streaming, optionally
/// returning structured tool-call records.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Send a completion request and stream the response.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ProviderError>;
}

/// Drain a [`ChatStream`] into a full [`ChatResponse`].
///
/// Useful for call sites that stream for latency but fold the result
/// before acting on it.
pub async fn collect_stream(mut stream: ChatStream) -> Result<ChatResponse, ProviderError> {
    use tokio_stream::StreamExt;

    let mut response = ChatResponse::default();
    let mut thinking = String::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { text } => response.text.push_str(&text),
            StreamEvent::ThinkingDelta { thinking: t } => thinking.push_str(&t),
            StreamEvent::ToolCallComplete { call } => response.tool_calls.push(call),
            StreamEvent::Done => break,
        }
    }

    if !thinking.is_empty() {
        response.thinking = Some(thinking);
    }
    Ok(response)
}
