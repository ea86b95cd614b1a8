//! Message and tool types shared by every chat provider.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A structured tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System prompt.
    pub system: Option<String>,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Tools available to the model.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Temperature (0.0 - 1.0).
    pub temperature: Option<f32>,
    /// Per-call deadline. A miss is reported as `ProviderError::Timeout`.
    pub deadline: Option<Duration>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: None,
            deadline: None,
        }
    }
}

impl ChatRequest {
    /// Create a request with the given messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A full (non-streamed) completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text.
    pub text: String,
    /// Extended-thinking content, when the provider exposes it.
    pub thinking: Option<String>,
    /// Structured tool calls, in emission order.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// A plain text reply with no tool calls.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCall {
            name: name.into(),
            arguments,
        });
        self
    }
}

/// Event from a streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta { text: String },
    /// A chunk of extended-thinking content.
    ThinkingDelta { thinking: String },
    /// A tool call whose arguments have fully accumulated.
    ToolCallComplete { call: ToolCall },
    /// The stream finished normally.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let req = ChatRequest::new(vec![ChatMessage::user("hello")])
            .with_system("be terse")
            .with_max_tokens(256)
            .with_temperature(1.4);

        assert_eq!(req.system.as_deref(), Some("be terse"));
        assert_eq!(req.max_tokens, 256);
        // Clamped to the valid range.
        assert_eq!(req.temperature, Some(1.0));
    }

    #[test]
    fn response_tool_calls_keep_order() {
        let resp = ChatResponse::text("done")
            .with_tool_call("first", serde_json::json!({}))
            .with_tool_call("second", serde_json::json!({}));

        let names: Vec<_> = resp.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
    }
}
