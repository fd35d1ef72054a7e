//! OpenAI-compatible Chat Completions provider.
//!
//! Speaks the `/chat/completions` streaming dialect, which also serves
//! Ollama (and any other compatible endpoint) through `base_url`. Tool-call
//! arguments arrive as string fragments keyed by call index; they are
//! accumulated and parsed when the stream finishes.

use std::collections::BTreeMap;
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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OpenAiProvider {
    name: &'static str,
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            name: "openai",
            model,
            api_key: Some(api_key),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// A keyless binding against a local Ollama endpoint.
    pub fn ollama(model: String, base_url: Option<String>) -> Self {
        Self {
            name: "ollama",
            model,
            api_key: None,
            base_url: base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_owned()),
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError> {
        let input_estimate = estimate_tokens(request.char_len());

        let mut body = json!({
            "model": self.model,
            "messages": build_messages(&request),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_output_tokens {
            body["max_completion_tokens"] = json!(m);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, base_url = %self.base_url, "sending chat completions request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(ProviderError::transport)?;

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

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

struct SseState {
    started: bool,
    finished: bool,
    calls: BTreeMap<u64, PendingCall>,
    finish_reason: Option<StopReason>,
    usage: Option<TokenUsage>,
    text_chars: usize,
    input_estimate: u32,
}

impl SseState {
    fn new(input_estimate: u32) -> Self {
        Self {
            started: false,
            finished: false,
            calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
            text_chars: 0,
            input_estimate,
        }
    }

    fn ingest(&mut self, data: &str) -> Vec<Result<StreamEvent, ProviderError>> {
        if self.finished {
            return Vec::new();
        }
        if data.trim() == "[DONE]" {
            return self.finish();
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

        // The usage-only chunk arrives with an empty choices array.
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(TokenUsage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            });
        }

        let Some(choice) = v["choices"].get(0) else {
            return events;
        };

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str()
            && !text.is_empty()
        {
            self.text_chars += text.len();
            events.push(Ok(StreamEvent::ContentDelta {
                text: text.to_owned(),
            }));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                let entry = self.calls.entry(index).or_insert_with(|| PendingCall {
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
                let mut newly_named = false;
                if let Some(id) = tc["id"].as_str() {
                    entry.id = id.to_owned();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    newly_named = entry.name.is_empty() && !name.is_empty();
                    entry.name += name;
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.arguments += args;
                }
                if newly_named {
                    events.push(Ok(StreamEvent::ToolUseStart {
                        id: entry.id.clone(),
                        name: entry.name.clone(),
                    }));
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(match reason {
                "tool_calls" => StopReason::ToolUse,
                "length" => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            });
        }

        events
    }

    /// Flush accumulated tool calls and close the message.
    fn finish(&mut self) -> Vec<Result<StreamEvent, ProviderError>> {
        self.finished = true;
        let mut events = Vec::new();

        for (_, call) in std::mem::take(&mut self.calls) {
            let raw = if call.arguments.trim().is_empty() {
                "{}"
            } else {
                call.arguments.as_str()
            };
            match serde_json::from_str::<Value>(raw) {
                Ok(input) => events.push(Ok(StreamEvent::ToolUseEnd {
                    id: call.id,
                    name: call.name,
                    input,
                })),
                Err(e) => events.push(Err(ProviderError::parse(format!(
                    "tool arguments for '{}' are not valid JSON: {e}",
                    call.name
                )))),
            }
        }

        let usage = self.usage.unwrap_or(TokenUsage {
            input_tokens: self.input_estimate,
            output_tokens: estimate_tokens(self.text_chars),
        });
        events.push(Ok(StreamEvent::MessageEnd {
            stop_reason: self.finish_reason.unwrap_or(StopReason::EndTurn),
            usage,
        }));
        events
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

fn build_messages(request: &ChatRequest) -> Vec<Value> {
    let mut out = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_prompt.is_empty() {
        out.push(json!({ "role": "system", "content": request.system_prompt }));
    }
    for m in &request.messages {
        match (&m.role, &m.content) {
            (Role::System, content) => {
                out.push(json!({ "role": "system", "content": content.text() }));
            }
            (Role::User, content) => {
                out.push(json!({ "role": "user", "content": content.text() }));
            }
            (Role::Assistant, MessageContent::Text(t)) => {
                out.push(json!({ "role": "assistant", "content": t }));
            }
            (Role::Assistant, MessageContent::Parts(parts)) => {
                let text: String = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                let tool_calls: Vec<Value> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            },
                        })),
                        _ => None,
                    })
                    .collect();
                let mut msg = json!({ "role": "assistant" });
                msg["content"] = if text.is_empty() {
                    Value::Null
                } else {
                    json!(text)
                };
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                out.push(msg);
            }
            (Role::Tool, MessageContent::Parts(parts)) => {
                for p in parts {
                    if let ContentPart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = p
                    {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
            }
            (Role::Tool, MessageContent::Text(t)) => {
                out.push(json!({ "role": "tool", "content": t }));
            }
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
