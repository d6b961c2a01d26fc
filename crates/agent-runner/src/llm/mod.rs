//! Model API message types and client abstraction

mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use conductor_core::run::TokenUsage;

use crate::error::{Result, RunnerError};

pub use anthropic::{AnthropicClient, AnthropicConfig};

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// A block type this client does not understand; it cannot be sent back
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// A conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// First text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Tool-use blocks in order
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

/// Tool description advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One model call
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Model reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl MessageResponse {
    /// Fail when a block cannot be replayed to the model as conversation history
    pub fn ensure_replayable(&self) -> Result<()> {
        if self
            .content
            .iter()
            .any(|block| matches!(block, ContentBlock::Unsupported))
        {
            return Err(RunnerError::serialization(
                "response contains a content block that cannot be sent back to the model",
            ));
        }
        Ok(())
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("end_turn") => Self::EndTurn,
            Some("tool_use") => Self::ToolUse,
            Some("max_tokens") => Self::MaxTokens,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other("none".to_string()),
        }
    }
}

/// Client for a tool-capable chat model
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_parse() {
        assert_eq!(StopReason::parse(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(StopReason::parse(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(StopReason::parse(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(
            StopReason::parse(Some("stop_sequence")),
            StopReason::Other("stop_sequence".to_string())
        );
        assert_eq!(StopReason::parse(None), StopReason::Other("none".to_string()));
    }

    #[test]
    fn test_decode_api_response() {
        let raw = serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });

        let response: MessageResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.usage, TokenUsage::new(12, 7));
        assert!(response.ensure_replayable().is_ok());

        let message = Message::assistant(response.content);
        assert_eq!(message.first_text(), Some("Let me look."));
        let uses: Vec<_> = message.tool_uses().collect();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "search");
    }

    #[test]
    fn test_unknown_block_is_not_replayable() {
        let raw = serde_json::json!({
            "content": [{"type": "redacted_thinking", "data": "..."}],
            "stop_reason": "end_turn"
        });
        let response: MessageResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            response.ensure_replayable(),
            Err(RunnerError::Serialization { .. })
        ));
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let request = MessageRequest {
            model: "m".to_string(),
            max_tokens: 16,
            messages: vec![Message::user_text("hi")],
            tools: vec![],
            system: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
    }
}
