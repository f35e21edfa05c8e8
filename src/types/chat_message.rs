use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

/// One turn of the conversation, as sent in `messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message.
    pub role: Role,

    /// The text of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a new `ChatMessage` with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&str> for ChatMessage {
    fn from(content: &str) -> Self {
        Self::user(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn message_serialization() {
        let message = ChatMessage::assistant("hello");
        assert_eq!(
            to_value(&message).unwrap(),
            json!({"role": "assistant", "content": "hello"})
        );
    }

    #[test]
    fn from_str_is_user() {
        let message: ChatMessage = "hi".into();
        assert_eq!(message.role, Role::User);
    }
}
