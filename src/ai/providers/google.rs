//! Google Gemini provider.
//!
//! Streams `models/{model}:streamGenerateContent?alt=sse`. Unlike the other
//! vendors, Gemini delivers function calls whole (no partial-JSON phase) and
//! assigns them no call IDs, so IDs are synthesised here and mapped back to
//! function names when tool results are sent.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::ai::provider::{ChatProvider, EventStream, ProviderError, estimate_tokens};
use crate::ai::types::{
    ChatMessage, ChatRequest, ContentPart, MessageContent, Role, StopReason, StreamEvent,
    TokenUsage,
};

use super::error_for_status;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GoogleProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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
impl ChatProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError> {
        let input_estimate = estimate_tokens(request.char_len());

        let mut body = json!({
            "contents": build_contents(&request.messages),
        });
        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": request.system_prompt }] });
        }
        let mut generation_config = json!({});
        if let Some(t) = request.temperature {
            generation_config["temperature"] = json!(t);
        }
        if let Some(m) = request.max_output_tokens {
            generation_config["maxOutputTokens"] = json!(m);
        }
        if generation_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = generation_config;
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        debug!(model = %self.model, "sending gemini request");

        let resp = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
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
            .scan(SseState::new(input_estimate), |state, item| {
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

struct SseState {
    started: bool,
    finished: bool,
    saw_function_call: bool,
    text_chars: usize,
    input_estimate: u32,
}

impl SseState {
    fn new(input_estimate: u32) -> Self {
        Self {
            started: false,
            finished: false,
            saw_function_call: false,
            text_chars: 0,
            input_estimate,
        }
    }

    fn ingest(&mut self, data: &str) -> Vec<Result<StreamEvent, ProviderError>> {
        if self.finished {
            return Vec::new();
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(Ok(StreamEvent::MessageStart));
        }

        if let Some(parts) = v["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str()
                    && !text.is_empty()
                {
                    self.text_chars += text.len();
                    events.push(Ok(StreamEvent::ContentDelta {
                        text: text.to_owned(),
                    }));
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call["name"].as_str().unwrap_or("").to_owned();
                    let input = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    let id = format!("{name}-{}", Uuid::new_v4());
                    self.saw_function_call = true;
                    events.push(Ok(StreamEvent::ToolUseStart {
                        id: id.clone(),
                        name: name.clone(),
                    }));
                    events.push(Ok(StreamEvent::ToolUseEnd { id, name, input }));
                }
            }
        }

        if let Some(reason) = v["candidates"][0]["finishReason"].as_str() {
            self.finished = true;
            let stop_reason = match reason {
                "MAX_TOKENS" => StopReason::MaxTokens,
                _ if self.saw_function_call => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            let usage = v.get("usageMetadata").map_or(
                TokenUsage {
                    input_tokens: self.input_estimate,
                    output_tokens: estimate_tokens(self.text_chars),
                },
                |u| TokenUsage {
                    input_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
                    output_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
                },
            );
            events.push(Ok(StreamEvent::MessageEnd { stop_reason, usage }));
        }

        events
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Convert canonical messages to Gemini `contents`.
///
/// Tool results are `functionResponse` parts in a user turn; the function
/// name is recovered from the assistant `ToolUse` part with the same id.
fn build_contents(messages: &[ChatMessage]) -> Vec<Value> {
    let mut call_names: HashMap<String, String> = HashMap::new();
    for m in messages {
        if let MessageContent::Parts(parts) = &m.content {
            for p in parts {
                if let ContentPart::ToolUse { id, name, .. } = p {
                    call_names.insert(id.clone(), name.clone());
                }
            }
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match (&m.role, &m.content) {
            (Role::System, _) => {}
            (Role::User, content) => {
                out.push(json!({
                    "role": "user",
                    "parts": [{ "text": content.text() }],
                }));
            }
            (Role::Assistant, MessageContent::Text(t)) => {
                out.push(json!({ "role": "model", "parts": [{ "text": t }] }));
            }
            (Role::Assistant, MessageContent::Parts(parts)) => {
                let wire_parts: Vec<Value> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(json!({ "text": text })),
                        ContentPart::ToolUse { name, input, .. } => Some(json!({
                            "functionCall": { "name": name, "args": input },
                        })),
                        ContentPart::ToolResult { .. } => None,
                    })
                    .collect();
                out.push(json!({ "role": "model", "parts": wire_parts }));
            }
            (Role::Tool, MessageContent::Parts(parts)) => {
                let wire_parts: Vec<Value> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => {
                            let name = call_names
                                .get(tool_call_id)
                                .cloned()
                                .unwrap_or_else(|| tool_call_id.clone());
                            let key = if *is_error { "error" } else { "content" };
                            Some(json!({
                                "functionResponse": {
                                    "name": name,
                                    "response": { key: content },
                                },
                            }))
                        }
                        _ => None,
                    })
                    .collect();
                out.push(json!({ "role": "user", "parts": wire_parts }));
            }
            (Role::Tool, MessageContent::Text(t)) => {
                out.push(json!({ "role": "user", "parts": [{ "text": t }] }));
            }
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
