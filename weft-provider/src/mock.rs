//! Deterministic mock providers for integration tests.
//!
//! No network, no model weights: `MockEmbedder` derives stable unit
//! vectors from token hashes, and `MockChat` replays a scripted response
//! queue. Both record what they were asked so tests can assert on it.

use crate::error::ProviderError;
use crate::message::{ChatRequest, ChatResponse, StreamEvent};
use crate::provider::{ChatProvider, ChatStream, EmbeddingProvider};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// A deterministic embedding provider.
///
/// Each lowercase token contributes a hash-derived direction, so texts
/// sharing words land measurably closer in cosine space, which is enough
/// signal for retrieval tests. The result is always unit-norm.
pub struct MockEmbedder {
    dimension: usize,
    embedded: Mutex<Vec<String>>,
}

impl MockEmbedder {
    /// Create a mock embedder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            embedded: Mutex::new(Vec::new()),
        }
    }

    /// Every text embedded so far, in call order.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    /// Number of embed calls made.
    pub fn embed_count(&self) -> usize {
        self.embedded.lock().unwrap().len()
    }

    /// Synchronous embedding used internally and by tests that need the
    /// exact vector a text maps to.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            for (i, slot) in v.iter_mut().enumerate() {
                let mut hasher = DefaultHasher::new();
                token.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                // Map the hash to [-1, 1].
                *slot += (h as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32;
            }
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embedded.lock().unwrap().push(text.to_string());
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A scripted reply for [`MockChat`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Respond(ChatResponse),
    /// Fail with a retryable provider error carrying this message.
    Fail(String),
}

/// A chat provider that returns scripted responses in order.
///
/// When the script runs dry it falls back to a canned narrative reply so
/// long pipelines keep moving.
pub struct MockChat {
    script: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChat {
    /// Create a mock with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock preloaded with responses.
    pub fn scripted(responses: Vec<ChatResponse>) -> Self {
        let mock = Self::new();
        for response in responses {
            mock.queue(response);
        }
        mock
    }

    /// Queue a response at the end of the script.
    pub fn queue(&self, response: ChatResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(MockReply::Respond(response));
    }

    /// Queue a failure at the end of the script.
    pub fn queue_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(MockReply::Fail(message.into()));
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of chat calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(message)) => Err(ProviderError::Provider(message)),
            None => Ok(ChatResponse::text("The story continues.")),
        }
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.next_reply(request)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ProviderError> {
        let response = self.next_reply(request)?;

        let mut events: Vec<Result<StreamEvent, ProviderError>> = Vec::new();
        if let Some(thinking) = &response.thinking {
            events.push(Ok(StreamEvent::ThinkingDelta {
                thinking: thinking.clone(),
            }));
        }
        // Split the text into a few chunks to exercise accumulation.
        let text = response.text;
        let mid = text.len() / 2;
        let split = (0..=mid)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        for chunk in [&text[..split], &text[split..]] {
            if !chunk.is_empty() {
                events.push(Ok(StreamEvent::TextDelta {
                    text: chunk.to_string(),
                }));
            }
        }
        for call in response.tool_calls {
            events.push(Ok(StreamEvent::ToolCallComplete { call }));
        }
        events.push(Ok(StreamEvent::Done));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}
