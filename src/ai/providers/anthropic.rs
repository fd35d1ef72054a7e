//! Anthropic Messages API provider.
//!
//! Streams `v1/messages` server-sent events and translates them into the
//! canonical [`StreamEvent`] vocabulary. Tool-call input arrives as
//! `input_json_delta` fragments which are accumulated per content block and
//! parsed once at `content_block_stop`; a parse failure surfaces as a stream
//! error item, not a crash.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

use crate::ai::provider::{ChatProvider, EventStream, ProviderError, estimate_tokens};
use crate::ai::types::{
    ChatMessage, ChatRequest, ContentPart, MessageContent, Role, StopReason, StreamEvent,
    TokenUsage,
};

use super::error_for_status;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError> {
        let max_tokens = request
            .max_output_tokens
            .unwrap_or_else(|| crate::ai::registry::model_info(&self.model).max_output_tokens);

        let mut body = json!({
            "model": self.model,
            "messages": build_messages(&request.messages),
            "max_tokens": max_tokens,
            "stream": true,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, tools = request.tools.len(), "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(error_for_status(status, text));
        }

        let stream = resp
            .bytes_stream()
            .eventsource()
            .scan(SseState::default(), |state, item| {
                let events = match item {
                    Ok(event) => state.ingest(&event.data),
                    Err(e) => vec![Err(ProviderError::transport(e))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }
}

// ─── SSE state machine ────────────────────────────────────────────────────────

/// In-flight tool block: id/name from `content_block_start`, input JSON
/// accumulated from `input_json_delta` fragments.
struct ToolBlock {
    id: String,
    name: String,
    partial_json: String,
}

#[derive(Default)]
struct SseState {
    blocks: HashMap<u64, ToolBlock>,
    input_tokens: u32,
    output_tokens: u32,
    text_chars: usize,
    stop_reason: Option<StopReason>,
}

impl SseState {
    fn ingest(&mut self, data: &str) -> Vec<Result<StreamEvent, ProviderError>> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            // Non-JSON payloads (keepalives) are skipped.
            Err(_) => return Vec::new(),
        };

        match v["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(usage) = v["message"].get("usage") {
                    self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                }
                vec![Ok(StreamEvent::MessageStart)]
            }
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let id = block["id"].as_str().unwrap_or("").to_owned();
                    let name = block["name"].as_str().unwrap_or("").to_owned();
                    self.blocks.insert(
                        index,
                        ToolBlock {
                            id: id.clone(),
                            name: name.clone(),
                            partial_json: String::new(),
                        },
                    );
                    vec![Ok(StreamEvent::ToolUseStart { id, name })]
                } else {
                    Vec::new()
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("").to_owned();
                        if text.is_empty() {
                            Vec::new()
                        } else {
                            self.text_chars += text.len();
                            vec![Ok(StreamEvent::ContentDelta { text })]
                        }
                    }
                    "input_json_delta" => {
                        if let Some(block) = self.blocks.get_mut(&index) {
                            block.partial_json += delta["partial_json"].as_str().unwrap_or("");
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0);
                match self.blocks.remove(&index) {
                    Some(block) => {
                        let raw = if block.partial_json.trim().is_empty() {
                            "{}"
                        } else {
                            block.partial_json.as_str()
                        };
                        match serde_json::from_str::<Value>(raw) {
                            Ok(input) => vec![Ok(StreamEvent::ToolUseEnd {
                                id: block.id,
                                name: block.name,
                                input,
                            })],
                            Err(e) => vec![Err(ProviderError::parse(format!(
                                "tool input for '{}' is not valid JSON: {e}",
                                block.name
                            )))],
                        }
                    }
                    None => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(match reason {
                        "tool_use" => StopReason::ToolUse,
                        "max_tokens" => StopReason::MaxTokens,
                        "stop_sequence" => StopReason::StopSequence,
                        _ => StopReason::EndTurn,
                    });
                }
                if let Some(usage) = v.get("usage") {
                    self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                }
                Vec::new()
            }
            "message_stop" => {
                let output_tokens = if self.output_tokens > 0 {
                    self.output_tokens
                } else {
                    estimate_tokens(self.text_chars)
                };
                vec![Ok(StreamEvent::MessageEnd {
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
                    usage: TokenUsage {
                        input_tokens: self.input_tokens,
                        output_tokens,
                    },
                })]
            }
            "error" => {
                let message = v["error"]["message"]
                    .as_str()
                    .unwrap_or("unspecified provider error")
                    .to_owned();
                vec![Err(ProviderError::Server {
                    status: 500,
                    message,
                })]
            }
            // ping and future event types
            _ => Vec::new(),
        }
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Convert canonical messages to the Anthropic `messages` array.
///
/// Tool results must come back as `tool_result` blocks in a `user` turn;
/// system messages never appear here (the caller passes the system prompt
/// separately).
fn build_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match (&m.role, &m.content) {
            (Role::System, _) => {}
            (Role::Tool, content) => {
                out.push(json!({
                    "role": "user",
                    "content": content_blocks(content),
                }));
            }
            (Role::User, content) => {
                out.push(json!({ "role": "user", "content": content_value(content) }));
            }
            (Role::Assistant, content) => {
                out.push(json!({ "role": "assistant", "content": content_value(content) }));
            }
        }
    }
    out
}

fn content_value(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => json!(t),
        MessageContent::Parts(_) => Value::Array(content_blocks(content)),
    }
}

fn content_blocks(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(t) => vec![json!({ "type": "text", "text": t })],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                ContentPart::ToolUse { id, name, input } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                }),
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                    "is_error": is_error,
                }),
            })
            .collect(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest(state: &mut SseState, data: &str) -> Vec<Result<StreamEvent, ProviderError>> {
        state.ingest(data)
    }

    #[test]
    fn message_start_captures_input_tokens() {
        let mut state = SseState::default();
        let events = ingest(
            &mut state,
            r#"{"type":"message_start","message":{"usage":{"input_tokens":42}}}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::MessageStart)));
        assert_eq!(state.input_tokens, 42);
    }

    #[test]
    fn text_delta_becomes_content_delta() {
        let mut state = SseState::default();
        let events = ingest(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::ContentDelta {
                text: "Hi".to_owned()
            }
        );
    }

    #[test]
    fn tool_input_accumulates_across_deltas() {
        let mut state = SseState::default();
        ingest(
            &mut state,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"calculator"}}"#,
        );
        ingest(
            &mut state,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"expression\":"}}"#,
        );
        ingest(
            &mut state,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"15+27\"}"}}"#,
        );
        let events = ingest(&mut state, r#"{"type":"content_block_stop","index":1}"#);

        match events[0].as_ref().unwrap() {
            StreamEvent::ToolUseEnd { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "calculator");
                assert_eq!(input["expression"], "15+27");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn empty_tool_input_parses_as_empty_object() {
        let mut state = SseState::default();
        ingest(
            &mut state,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"date-time"}}"#,
        );
        let events = ingest(&mut state, r#"{"type":"content_block_stop","index":0}"#);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolUseEnd { input, .. } => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_input_yields_parse_error() {
        let mut state = SseState::default();
        ingest(
            &mut state,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"calculator"}}"#,
        );
        ingest(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"expr\": not-json"}}"#,
        );
        let events = ingest(&mut state, r#"{"type":"content_block_stop","index":0}"#);
        assert!(matches!(events[0], Err(ProviderError::Parse { .. })));
    }

    #[test]
    fn message_stop_reports_usage_and_stop_reason() {
        let mut state = SseState::default();
        ingest(
            &mut state,
            r#"{"type":"message_start","message":{"usage":{"input_tokens":10}}}"#,
        );
        ingest(
            &mut state,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#,
        );
        let events = ingest(&mut state, r#"{"type":"message_stop"}"#);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::MessageEnd {
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5
                },
            }
        );
    }

    #[test]
    fn missing_output_tokens_are_estimated_from_chars() {
        let mut state = SseState::default();
        ingest(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"12345678"}}"#,
        );
        let events = ingest(&mut state, r#"{"type":"message_stop"}"#);
        match events[0].as_ref().unwrap() {
            StreamEvent::MessageEnd { usage, .. } => assert_eq!(usage.output_tokens, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_results_are_sent_as_user_turns() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_with_tools(
                "checking".to_owned(),
                vec![crate::ai::types::ToolCall {
                    id: "c1".to_owned(),
                    name: "calculator".to_owned(),
                    input: json!({"expression": "1+1"}),
                }],
            ),
            ChatMessage::tool_result("c1", "{\"value\":2}".to_owned(), false),
        ];
        let wire = build_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["type"], "tool_result");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "c1");
    }
}
