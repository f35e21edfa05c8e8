use serde::{Deserialize, Serialize};

/// A complete (non-streaming) chat completion.
///
/// Only the fields the client reads are modelled; everything else the gateway
/// sends is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Completion identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The model that actually served the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Candidate answers; the client uses the first.
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

/// One candidate answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Position among the choices.
    #[serde(default)]
    pub index: u32,

    /// The assistant message.
    #[serde(default)]
    pub message: CompletionMessage,

    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The assistant message inside a choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Role reported by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletion {
    /// Text of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }

    /// The served model, ignoring an empty string.
    pub fn served_model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}
