//! Provider capability traits for the weft engine.
//!
//! The engine never talks to a concrete model vendor. Everything it needs
//! from the outside world is expressed as two capabilities:
//!
//! - [`EmbeddingProvider`]: text in, unit-norm vector out
//! - [`ChatProvider`]: messages in, text (plus structured tool calls) out,
//!   optionally streamed
//!
//! This crate also carries the shared message/tool types, deadline
//! handling, a bounded-backoff retry helper, and deterministic mock
//! providers for tests.

pub mod error;
pub mod message;
pub mod mock;
pub mod provider;
pub mod retry;

pub use error::ProviderError;
pub use message::{
    ChatMessage, ChatRequest, ChatResponse, Role, StreamEvent, ToolCall, ToolDefinition,
};
pub use mock::{MockChat, MockEmbedder, MockReply};
pub use provider::{collect_stream, ChatProvider, ChatStream, EmbeddingProvider};
pub use retry::{retry_with_backoff, with_deadline, RetryPolicy};
