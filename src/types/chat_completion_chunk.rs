use serde::{Deserialize, Deserializer, Serialize};

/// One decoded `data:` payload of a streaming completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The model that served this chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Incremental choices.
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChunkChoice>,
}

/// An incremental choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Position among the choices.
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,

    /// The increment.
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: ChunkDelta,

    /// Why generation stopped, on the last chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The text increment carried by a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, usually only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// New text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Some gateways send `null` where a field is simply absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatCompletionChunk {
    /// Non-empty `choices[0].delta.content`.
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Non-empty `model`.
    pub fn served_model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_with_text() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"model": "gpt-4o", "choices": [{"index": 0, "delta": {"content": "Hel"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.delta_text(), Some("Hel"));
        assert_eq!(chunk.served_model(), Some("gpt-4o"));
    }

    #[test]
    fn role_only_chunk_has_no_text() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices": [{"delta": {"role": "assistant", "content": ""}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.delta_text(), None);
        assert_eq!(chunk.served_model(), None);
    }

    #[test]
    fn null_fields_keep_the_model() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"model": "gpt-4o-mini", "choices": [{"index": null, "delta": null, "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.served_model(), Some("gpt-4o-mini"));
        assert_eq!(chunk.delta_text(), None);
        assert_eq!(chunk.choices[0].index, 0);

        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"model": "gpt-4o", "choices": null}"#).unwrap();
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn no_choices() {
        let chunk: ChatCompletionChunk = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(chunk.delta_text(), None);
    }
}
