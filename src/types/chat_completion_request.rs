use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model identifier.
    pub model: String,

    /// Full conversation history, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Whether the gateway should answer with a `data:` line stream.
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Create a non-streaming request.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
        }
    }

    /// Set the stream flag.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}
