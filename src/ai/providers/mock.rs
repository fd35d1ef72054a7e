//! Scripted provider for tests.
//!
//! Each `chat()` call consumes the next script: either an error or a list of
//! steps (events interleaved with delays, so cancellation mid-stream can be
//! exercised). Requests are recorded for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::ai::provider::{ChatProvider, EventStream, ProviderError};
use crate::ai::types::{ChatRequest, StopReason, StreamEvent, TokenUsage};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(StreamEvent),
    Error(ProviderError),
    /// Sleep before the next step; lets tests abort mid-stream.
    Delay(Duration),
}

#[derive(Debug, Clone)]
enum ScriptedCall {
    Stream(Vec<ScriptStep>),
    FailToConnect(ProviderError),
}

pub struct MockProvider {
    model: String,
    scripts: Mutex<VecDeque<ScriptedCall>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script a call that fails before producing a stream.
    pub fn fail_once(self, error: ProviderError) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(ScriptedCall::FailToConnect(error));
        }
        self
    }

    /// Script a plain text response ending with `end_turn`.
    pub fn then_text(self, text: &str, input_tokens: u32, output_tokens: u32) -> Self {
        self.then_steps(text_steps(text, input_tokens, output_tokens))
    }

    /// Script a single tool call ending with `tool_use`.
    pub fn then_tool_call(
        self,
        id: &str,
        name: &str,
        input: Value,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Self {
        self.then_steps(tool_call_steps(id, name, input, input_tokens, output_tokens))
    }

    /// Script an arbitrary step sequence.
    pub fn then_steps(self, steps: Vec<ScriptStep>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(ScriptedCall::Stream(steps));
        }
        self
    }

    /// Shared counter of `chat()` invocations.
    pub fn call_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Requests recorded so far.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            // An unscripted call answers with an empty end_turn message.
            .unwrap_or_else(|| ScriptedCall::Stream(text_steps("", 0, 0)));

        match script {
            ScriptedCall::FailToConnect(e) => Err(e),
            ScriptedCall::Stream(steps) => {
                let steps: VecDeque<ScriptStep> = steps.into();
                let stream = futures::stream::unfold(steps, |mut steps| async move {
                    loop {
                        match steps.pop_front() {
                            None => return None,
                            Some(ScriptStep::Delay(d)) => tokio::time::sleep(d).await,
                            Some(ScriptStep::Event(e)) => return Some((Ok(e), steps)),
                            Some(ScriptStep::Error(e)) => return Some((Err(e), steps)),
                        }
                    }
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// Steps for a plain text turn.
pub fn text_steps(text: &str, input_tokens: u32, output_tokens: u32) -> Vec<ScriptStep> {
    let mut steps = vec![ScriptStep::Event(StreamEvent::MessageStart)];
    if !text.is_empty() {
        steps.push(ScriptStep::Event(StreamEvent::ContentDelta {
            text: text.to_owned(),
        }));
    }
    steps.push(ScriptStep::Event(StreamEvent::MessageEnd {
        stop_reason: StopReason::EndTurn,
        usage: TokenUsage {
            input_tokens,
            output_tokens,
        },
    }));
    steps
}

/// Steps for a turn that requests one tool call.
pub fn tool_call_steps(
    id: &str,
    name: &str,
    input: Value,
    input_tokens: u32,
    output_tokens: u32,
) -> Vec<ScriptStep> {
    vec![
        ScriptStep::Event(StreamEvent::MessageStart),
        ScriptStep::Event(StreamEvent::ToolUseStart {
            id: id.to_owned(),
            name: name.to_owned(),
        }),
        ScriptStep::Event(StreamEvent::ToolUseEnd {
            id: id.to_owned(),
            name: name.to_owned(),
            input,
        }),
        ScriptStep::Event(StreamEvent::MessageEnd {
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
            },
        }),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
