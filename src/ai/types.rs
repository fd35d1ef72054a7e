//! Canonical message, tool-schema and stream-event types shared by all
//! provider implementations.
//!
//! Vendor wire formats differ; every provider translates to and from these
//! types so the agent loop sees one event vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Role ─────────────────────────────────────────────────────────────────────

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Carries tool results back to the model.
    Tool,
}

// ─── Content ──────────────────────────────────────────────────────────────────

/// One block inside a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

/// Message content: plain text or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Approximate character length used for token estimation. Tool inputs
    /// and results count through their serialized form.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::ToolUse { name, input, .. } => {
                        name.len() + input.to_string().len()
                    }
                    ContentPart::ToolResult { content, .. } => content.len(),
                })
                .sum(),
        }
    }
}

// ─── ChatMessage ──────────────────────────────────────────────────────────────

/// A message in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// An assistant turn carrying text plus the tool calls it requested.
    pub fn assistant_with_tools(text: String, calls: Vec<ToolCall>) -> Self {
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
        for call in calls {
            parts.push(ContentPart::ToolUse {
                id: call.id,
                name: call.name,
                input: call.input,
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    /// A tool-result message answering the given tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: String, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                content,
                is_error,
            }]),
        }
    }

    pub fn char_len(&self) -> usize {
        self.content.char_len()
    }
}

// ─── ToolCall / ToolSchema ────────────────────────────────────────────────────

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Tool description in the form providers accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ─── StopReason / Usage ───────────────────────────────────────────────────────

/// Why the model stopped emitting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
        }
    }
}

/// Token counts reported (or estimated) for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

// ─── StreamEvent ──────────────────────────────────────────────────────────────

/// One event on a provider stream, in provider-neutral form.
///
/// Partial tool-input JSON is accumulated inside each provider and parsed
/// once, so `ToolUseEnd` always carries a complete input value.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    ContentDelta {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolUseEnd {
        id: String,
        name: String,
        input: Value,
    },
    MessageEnd {
        stop_reason: StopReason,
        usage: TokenUsage,
    },
}

// ─── ChatRequest ──────────────────────────────────────────────────────────────

/// A fully-assembled request for one provider call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: String,
    pub tools: Vec<ToolSchema>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, system_prompt: impl Into<String>) -> Self {
        Self {
            messages,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            max_output_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    /// Character length of everything that contributes input tokens.
    pub fn char_len(&self) -> usize {
        self.system_prompt.len()
            + self
                .messages
                .iter()
                .map(ChatMessage::char_len)
                .sum::<usize>()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_with_tools_builds_parts() {
        let msg = ChatMessage::assistant_with_tools(
            "Let me check.".to_owned(),
            vec![ToolCall {
                id: "c1".to_owned(),
                name: "calculator".to_owned(),
                input: json!({"expression": "1+1"}),
            }],
        );
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ToolUse { .. }));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn empty_text_is_omitted_from_parts() {
        let msg = ChatMessage::assistant_with_tools(
            String::new(),
            vec![ToolCall {
                id: "c1".to_owned(),
                name: "t".to_owned(),
                input: json!({}),
            }],
        );
        match &msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 1),
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn content_text_concatenates_text_blocks() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "a".to_owned(),
            },
            ContentPart::ToolUse {
                id: "x".to_owned(),
                name: "t".to_owned(),
                input: json!({}),
            },
            ContentPart::Text {
                text: "b".to_owned(),
            },
        ]);
        assert_eq!(content.text(), "ab");
    }

    #[test]
    fn stop_reason_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::EndTurn).unwrap(),
            "\"end_turn\""
        );
        assert_eq!(StopReason::MaxTokens.as_str(), "max_tokens");
    }

    #[test]
    fn char_len_counts_tool_payloads() {
        let msg = ChatMessage::tool_result("c1", "output text".to_owned(), false);
        assert_eq!(msg.char_len(), "output text".len());
    }
}
