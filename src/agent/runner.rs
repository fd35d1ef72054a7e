//! The agent execution loop.
//!
//! # Algorithm
//!
//! ```text
//! append user message; start trace
//!       │
//!       ▼
//! fit history to context window ──► cost precheck ──► provider.chat()
//!       │                                                  │
//!       │                    ┌─────────────────────────────┘
//!       ▼                    ▼
//! consume stream: deltas → trace; tool calls collected
//!       │
//!       ▼ message_end
//! pending tool calls and limits allow?
//!   yes → resolve each in order (approval gate may suspend),
//!         feed results back, next iteration
//!   no  → finalise assistant message, persist trace, done
//! ```
//!
//! Limits each set a specific terminal status: session turn ceiling →
//! `max_turns`, tool-call ceiling → `max_turns` (extras truncated), cost
//! guard refusal → `budget_exceeded` (or the matching kind), abort signal →
//! `cancelled`. Tool-level failures are fed back to the model as error tool
//! results; the agent is allowed to recover. Partial assistant text produced
//! before a terminal condition is still stored, flagged by the trace status.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::instrument;

use crate::ai::provider::{ChatProvider, EventStream, ProviderError, estimate_tokens};
use crate::ai::providers::ReliableProvider;
use crate::ai::types::{
    ChatMessage, ChatRequest, StopReason, StreamEvent, TokenUsage, ToolCall,
};
use crate::config::AgentConfig;
use crate::cost::CostGuard;
use crate::error::ErrorCode;
use crate::memory::{FitLimits, fit_messages};
use crate::prompts::PromptSnapshot;
use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{ToolContext, ToolError, ToolPermissions};
use crate::trace::{ExecutionTrace, TraceEvent, TraceRecorder, TraceStatus};

use super::signal::AbortSignal;

// ─── Request / outcome ────────────────────────────────────────────────────────

/// Everything one turn needs.
#[derive(Clone)]
pub struct TurnRequest {
    pub project_id: String,
    pub session_id: String,
    pub sanitized_message: String,
    pub agent_config: AgentConfig,
    pub system_prompt: String,
    pub prompt_snapshot: PromptSnapshot,
    pub conversation_history: Vec<ChatMessage>,
    pub abort: AbortSignal,
    /// Cost ceiling for this run alone (scheduled tasks).
    pub per_run_budget_usd: Option<f64>,
}

/// One completed tool call, for the response envelope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSummary {
    pub tool_id: String,
    pub input: Value,
    pub result: Value,
    pub is_error: bool,
}

/// What a turn produced. A terminal error still carries the finished trace;
/// callers persist it and shape the error envelope from `error`.
#[derive(Debug)]
pub struct TurnOutcome {
    pub trace: ExecutionTrace,
    pub assistant_text: String,
    pub tool_calls: Vec<ToolCallSummary>,
    pub usage: TokenUsage,
    /// Messages this turn appended (user, assistant, tool results), in
    /// order, ready to be persisted onto the session.
    pub new_messages: Vec<ChatMessage>,
    pub error: Option<(ErrorCode, String)>,
}

impl TurnOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ─── Internal stream bookkeeping ──────────────────────────────────────────────

/// A tool call collected from the stream. Malformed inputs (tool-input JSON
/// that never parsed) are carried through so they surface as failed tool
/// calls rather than crashing the turn.
enum PendingCall {
    Ready(ToolCall),
    Malformed {
        id: String,
        name: String,
        message: String,
    },
}

impl PendingCall {
    fn as_tool_call(&self) -> ToolCall {
        match self {
            Self::Ready(call) => call.clone(),
            Self::Malformed { id, name, .. } => ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: Value::Object(serde_json::Map::new()),
            },
        }
    }
}

/// What one provider stream produced.
struct StreamResult {
    text: String,
    calls: Vec<PendingCall>,
    stop_reason: StopReason,
    usage: TokenUsage,
}

enum StreamEnd {
    Finished(StreamResult),
    Cancelled { partial_text: String },
    Failed { error: ProviderError, partial_text: String },
}

/// Working state of one turn: the provider-facing message list plus the
/// slice of it that is new this turn (pruning may shrink the history, so the
/// new messages are tracked separately).
struct Conversation {
    working: Vec<ChatMessage>,
    appended: Vec<ChatMessage>,
}

impl Conversation {
    fn new(history: Vec<ChatMessage>) -> Self {
        Self {
            working: history,
            appended: Vec::new(),
        }
    }

    fn push(&mut self, message: ChatMessage) {
        self.working.push(message.clone());
        self.appended.push(message);
    }
}

// ─── AgentRunner ──────────────────────────────────────────────────────────────

pub struct AgentRunner {
    registry: Arc<ToolRegistry>,
    cost_guard: Arc<CostGuard>,
}

impl AgentRunner {
    pub fn new(registry: Arc<ToolRegistry>, cost_guard: Arc<CostGuard>) -> Self {
        Self {
            registry,
            cost_guard,
        }
    }

    /// Execute one turn sequence against the given provider.
    #[instrument(
        name = "agent.turn",
        skip_all,
        fields(
            project_id = %request.project_id,
            session_id = %request.session_id,
            model = %request.agent_config.provider.model,
        )
    )]
    pub async fn run_turn(
        &self,
        provider: Arc<dyn ChatProvider>,
        request: TurnRequest,
    ) -> TurnOutcome {
        let config = &request.agent_config;
        let model = config.provider.model.clone();
        let provider: Arc<dyn ChatProvider> = Arc::new(ReliableProvider::new(
            provider,
            config.failover.clone(),
        ));

        let trace = TraceRecorder::start(
            request.project_id.clone(),
            request.session_id.clone(),
            request.prompt_snapshot.clone(),
        );
        trace.record(TraceEvent::MessageStart);

        let ctx = ToolContext::new(
            request.project_id.clone(),
            request.session_id.clone(),
            ToolPermissions {
                allowed_tools: config.allowed_tools.clone(),
            },
        )
        .with_abort(request.abort.clone());

        let mut conversation = Conversation::new(request.conversation_history.clone());
        conversation.push(ChatMessage::user(request.sanitized_message.clone()));

        let mut summaries: Vec<ToolCallSummary> = Vec::new();
        let mut total_usage = TokenUsage::default();
        let mut tool_calls_in_turn: u32 = 0;
        let mut assistant_text = String::new();
        let mut final_stop = StopReason::EndTurn;
        let mut error: Option<(ErrorCode, String)> = None;
        // Whether the final assistant message has been appended.
        let mut finalized = false;

        let max_turns = config.cost_config.max_turns_per_session;
        let max_tool_calls = config.cost_config.max_tool_calls_per_turn;

        'turns: loop {
            if request.abort.is_aborted() {
                self.note_cancelled(&trace, &mut error);
                break;
            }

            // (a) Fit the working set into the model's context window.
            fit_messages(
                &mut conversation.working,
                &request.system_prompt,
                &config.memory_config.context_window,
                FitLimits {
                    context_window: provider.context_window(),
                },
            );

            // (b) Cost guard precheck on the estimated input.
            let estimated = provider
                .count_tokens(&conversation.working)
                .saturating_add(estimate_tokens(request.system_prompt.len()));
            if let Err(e) = self.cost_guard.precheck(
                &request.project_id,
                &request.session_id,
                &config.cost_config,
                estimated,
            ) {
                let code = e.code();
                trace.record(TraceEvent::Error {
                    code,
                    message: e.to_string(),
                });
                trace.set_status(status_for(code));
                error = Some((code, e.to_string()));
                break;
            }
            if let Some(budget) = request.per_run_budget_usd
                && trace.total_cost_usd() >= budget
            {
                let message = format!(
                    "run spend ${:.4} has reached the per-run budget of ${budget:.4}",
                    trace.total_cost_usd()
                );
                trace.record(TraceEvent::Error {
                    code: ErrorCode::BudgetExceeded,
                    message: message.clone(),
                });
                trace.set_status(TraceStatus::BudgetExceeded);
                error = Some((ErrorCode::BudgetExceeded, message));
                break;
            }

            // (c) Tool schemas: registered ∩ allowlist.
            let tools = self.registry.format_for_provider(&ctx);

            // (d) Provider call, raced against cancellation.
            let chat_request = ChatRequest {
                messages: conversation.working.clone(),
                system_prompt: request.system_prompt.clone(),
                tools,
                max_output_tokens: config.provider.max_output_tokens,
                temperature: config.provider.temperature,
            };
            let stream = tokio::select! {
                _ = request.abort.aborted() => {
                    self.note_cancelled(&trace, &mut error);
                    break;
                }
                result = provider.chat(chat_request) => result,
            };
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    trace.record(TraceEvent::Error {
                        code: ErrorCode::ProviderError,
                        message: e.to_string(),
                    });
                    trace.set_status(TraceStatus::Failed);
                    error = Some((ErrorCode::ProviderError, e.to_string()));
                    break;
                }
            };

            let result = match self.consume_stream(stream, &request.abort, &trace).await {
                StreamEnd::Finished(result) => result,
                StreamEnd::Cancelled { partial_text } => {
                    assistant_text = partial_text;
                    self.note_cancelled(&trace, &mut error);
                    break;
                }
                StreamEnd::Failed {
                    error: e,
                    partial_text,
                } => {
                    assistant_text = partial_text;
                    trace.record(TraceEvent::Error {
                        code: ErrorCode::ProviderError,
                        message: e.to_string(),
                    });
                    trace.set_status(TraceStatus::Failed);
                    error = Some((ErrorCode::ProviderError, e.to_string()));
                    break;
                }
            };

            trace.record_turn_usage(result.usage, &model);
            total_usage.input_tokens += result.usage.input_tokens;
            total_usage.output_tokens += result.usage.output_tokens;
            let _ = self.cost_guard.record_usage(
                &request.project_id,
                &request.session_id,
                trace.id(),
                trace.turn_count().saturating_sub(1),
                result.usage.input_tokens,
                result.usage.output_tokens,
                &model,
            );

            assistant_text = result.text.clone();
            final_stop = result.stop_reason;

            // (e/f) Continue through tools, or finalise.
            let mut calls = result.calls;
            if calls.is_empty() || trace.turn_count() >= max_turns {
                if !calls.is_empty() {
                    // Pending tool calls with no turns left to run them.
                    trace.set_status(TraceStatus::MaxTurns);
                    error = Some((
                        ErrorCode::TurnLimitExceeded,
                        format!("turn limit of {max_turns} reached with tool calls pending"),
                    ));
                }
                conversation.push(ChatMessage::assistant(assistant_text.clone()));
                trace.record(TraceEvent::LlmResponse {
                    text: assistant_text.clone(),
                });
                finalized = true;
                break;
            }

            // Tool-call ceiling: truncate extras and end the turn after the
            // admitted calls run.
            let admitted = max_tool_calls.saturating_sub(tool_calls_in_turn) as usize;
            let truncated = calls.len() > admitted;
            if truncated {
                calls.truncate(admitted);
            }

            conversation.push(ChatMessage::assistant_with_tools(
                result.text.clone(),
                calls.iter().map(PendingCall::as_tool_call).collect(),
            ));

            for call in &calls {
                if request.abort.is_aborted() {
                    self.note_cancelled(&trace, &mut error);
                    break 'turns;
                }
                tool_calls_in_turn += 1;
                match self.dispatch_call(call, &ctx, &trace).await {
                    Ok((summary, message)) => {
                        summaries.push(summary);
                        conversation.push(message);
                    }
                    Err(()) => {
                        // Cancellation inside the tool path.
                        self.note_cancelled(&trace, &mut error);
                        break 'turns;
                    }
                }
            }

            if truncated {
                trace.set_status(TraceStatus::MaxTurns);
                error = Some((
                    ErrorCode::TurnLimitExceeded,
                    format!("tool-call limit of {max_tool_calls} reached; extra calls dropped"),
                ));
                // The assistant message with its tool calls is already in
                // place; just close out the response.
                trace.record(TraceEvent::LlmResponse {
                    text: assistant_text.clone(),
                });
                finalized = true;
                break;
            }
        }

        // Terminal paths that broke out early still store whatever text had
        // streamed; the trace status flags it.
        if !finalized && !assistant_text.is_empty() {
            conversation.push(ChatMessage::assistant(assistant_text.clone()));
            trace.record(TraceEvent::LlmResponse {
                text: assistant_text.clone(),
            });
        }

        trace.record(TraceEvent::MessageEnd {
            stop_reason: final_stop,
            usage: total_usage,
        });

        TurnOutcome {
            trace: trace.finish(),
            assistant_text,
            tool_calls: summaries,
            usage: total_usage,
            new_messages: conversation.appended,
            error,
        }
    }

    /// Drain one provider stream, tracing deltas and collecting tool calls.
    async fn consume_stream(
        &self,
        mut stream: EventStream,
        abort: &AbortSignal,
        trace: &TraceRecorder,
    ) -> StreamEnd {
        let mut text = String::new();
        let mut calls: Vec<PendingCall> = Vec::new();
        let mut open_call: Option<(String, String)> = None;
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();

        loop {
            let item = tokio::select! {
                _ = abort.aborted() => {
                    return StreamEnd::Cancelled { partial_text: text };
                }
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Ok(StreamEvent::MessageStart)) => {}
                Some(Ok(StreamEvent::ContentDelta { text: delta })) => {
                    text += &delta;
                    trace.record(TraceEvent::LlmDelta { text: delta });
                }
                Some(Ok(StreamEvent::ToolUseStart { id, name })) => {
                    open_call = Some((id, name));
                }
                Some(Ok(StreamEvent::ToolUseEnd { id, name, input })) => {
                    open_call = None;
                    calls.push(PendingCall::Ready(ToolCall { id, name, input }));
                }
                Some(Ok(StreamEvent::MessageEnd {
                    stop_reason: reason,
                    usage: u,
                })) => {
                    stop_reason = reason;
                    usage = u;
                    break;
                }
                Some(Err(ProviderError::Parse { message })) => {
                    // A tool input that never became valid JSON surfaces as
                    // a failed tool call; the model may recover next turn.
                    if let Some((id, name)) = open_call.take() {
                        calls.push(PendingCall::Malformed { id, name, message });
                    } else {
                        trace.record(TraceEvent::Error {
                            code: ErrorCode::ProviderError,
                            message,
                        });
                    }
                }
                Some(Err(e)) => {
                    return StreamEnd::Failed {
                        error: e,
                        partial_text: text,
                    };
                }
            }
        }

        StreamEnd::Finished(StreamResult {
            text,
            calls,
            stop_reason,
            usage,
        })
    }

    /// Run one tool call through the registry, tracing start and end. Any
    /// tool-level failure becomes an error tool result; only cancellation
    /// escapes (as `Err(())`).
    async fn dispatch_call(
        &self,
        call: &PendingCall,
        ctx: &ToolContext,
        trace: &TraceRecorder,
    ) -> Result<(ToolCallSummary, ChatMessage), ()> {
        let shape = call.as_tool_call();
        trace.record(TraceEvent::ToolCallStart {
            id: shape.id.clone(),
            tool_id: shape.name.clone(),
            input: shape.input.clone(),
        });

        let result = match call {
            PendingCall::Malformed { name, message, .. } => Err(ToolError::InputValidation {
                issues: vec![crate::error::ValidationIssue::new(
                    "$",
                    format!("tool input for '{name}' was not valid JSON: {message}"),
                )],
            }),
            PendingCall::Ready(call) => {
                self.registry
                    .resolve(&call.name, &call.id, call.input.clone(), ctx, Some(trace))
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                trace.record(TraceEvent::ToolCallEnd {
                    id: shape.id.clone(),
                    output: outcome.output.clone(),
                    is_error: false,
                    duration_ms: outcome.duration_ms,
                });
                let content = outcome.output.to_string();
                Ok((
                    ToolCallSummary {
                        tool_id: shape.name,
                        input: shape.input,
                        result: outcome.output,
                        is_error: false,
                    },
                    ChatMessage::tool_result(shape.id, content, false),
                ))
            }
            Err(ToolError::Cancelled) => Err(()),
            Err(e) => {
                let output = e.to_output();
                trace.record(TraceEvent::ToolCallEnd {
                    id: shape.id.clone(),
                    output: output.clone(),
                    is_error: true,
                    duration_ms: 0,
                });
                let content = output.to_string();
                Ok((
                    ToolCallSummary {
                        tool_id: shape.name,
                        input: shape.input,
                        result: output,
                        is_error: true,
                    },
                    ChatMessage::tool_result(shape.id, content, true),
                ))
            }
        }
    }

    fn note_cancelled(&self, trace: &TraceRecorder, error: &mut Option<(ErrorCode, String)>) {
        trace.record(TraceEvent::Error {
            code: ErrorCode::Cancelled,
            message: "turn cancelled".to_owned(),
        });
        trace.set_status(TraceStatus::Cancelled);
        if error.is_none() {
            *error = Some((ErrorCode::Cancelled, "turn cancelled".to_owned()));
        }
    }
}

/// Trace status matching a terminal error code.
fn status_for(code: ErrorCode) -> TraceStatus {
    match code {
        ErrorCode::TurnLimitExceeded => TraceStatus::MaxTurns,
        ErrorCode::BudgetExceeded
        | ErrorCode::TokenLimitExceeded
        | ErrorCode::RateLimitExceeded => TraceStatus::BudgetExceeded,
        ErrorCode::Cancelled => TraceStatus::Cancelled,
        _ => TraceStatus::Failed,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::providers::mock::{MockProvider, ScriptStep};
    use crate::config::ProviderKind;
    use crate::cost::InMemoryUsageStore;
    use crate::prompts::sha256_hex;
    use crate::tools::builtin::register_builtins;
    use serde_json::json;
    use std::time::Duration;

    fn snapshot() -> PromptSnapshot {
        PromptSnapshot {
            identity_layer_id: "l1".to_owned(),
            identity_version: 1,
            instructions_layer_id: "l2".to_owned(),
            instructions_version: 1,
            safety_layer_id: "l3".to_owned(),
            safety_version: 1,
            tool_docs_hash: sha256_hex(""),
            runtime_context_hash: sha256_hex(""),
        }
    }

    fn runner() -> AgentRunner {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        AgentRunner::new(
            Arc::new(registry),
            Arc::new(CostGuard::new(Arc::new(InMemoryUsageStore::new()))),
        )
    }

    fn request(allowed: &[&str]) -> TurnRequest {
        let mut config = AgentConfig::for_model(ProviderKind::Openai, "mock-model");
        config.allowed_tools = allowed.iter().map(|s| s.to_string()).collect();
        TurnRequest {
            project_id: "p1".to_owned(),
            session_id: "s1".to_owned(),
            sanitized_message: "Hi".to_owned(),
            agent_config: config,
            system_prompt: "You are a test assistant.".to_owned(),
            prompt_snapshot: snapshot(),
            conversation_history: Vec::new(),
            abort: AbortSignal::new(),
            per_run_budget_usd: None,
        }
    }

    #[tokio::test]
    async fn basic_chat_completes() {
        let provider = Arc::new(MockProvider::new("mock-model").then_text("Hello.", 10, 5));
        let outcome = runner().run_turn(provider, request(&[])).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.assistant_text, "Hello.");
        assert_eq!(outcome.trace.status, TraceStatus::Completed);
        assert_eq!(outcome.usage.input_tokens, 10);
        assert_eq!(outcome.usage.output_tokens, 5);
        assert!(outcome.tool_calls.is_empty());
        // User + assistant messages for the session.
        assert_eq!(outcome.new_messages.len(), 2);
        assert_eq!(outcome.trace.turn_count, 1);
    }

    #[tokio::test]
    async fn tool_call_round_trip() {
        let provider = Arc::new(
            MockProvider::new("mock-model")
                .then_tool_call("c1", "calculator", json!({"expression": "15+27"}), 12, 6)
                .then_text("42.", 20, 3),
        );
        let outcome = runner()
            .run_turn(provider, request(&["calculator"]))
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.assistant_text, "42.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].tool_id, "calculator");
        assert_eq!(outcome.tool_calls[0].input, json!({"expression": "15+27"}));
        assert_eq!(outcome.tool_calls[0].result, json!({"value": 42}));
        assert!(!outcome.tool_calls[0].is_error);
        assert_eq!(outcome.trace.turn_count, 2);
        assert_eq!(outcome.usage.input_tokens, 32);
        // user, assistant+tool_use, tool result, final assistant.
        assert_eq!(outcome.new_messages.len(), 4);
    }

    #[tokio::test]
    async fn disallowed_tool_recovers() {
        let provider = Arc::new(
            MockProvider::new("mock-model")
                .then_tool_call("c1", "date-time", json!({}), 10, 5)
                .then_text("I cannot check the time.", 15, 4),
        );
        // Allowlist has calculator only.
        let outcome = runner()
            .run_turn(provider, request(&["calculator"]))
            .await;

        assert!(outcome.succeeded(), "runner should continue after denial");
        assert_eq!(outcome.assistant_text, "I cannot check the time.");
        assert_eq!(outcome.trace.status, TraceStatus::Completed);

        let denied = outcome
            .trace
            .events
            .iter()
            .find_map(|r| match &r.event {
                TraceEvent::ToolCallEnd {
                    is_error: true,
                    output,
                    ..
                } => Some(output.clone()),
                _ => None,
            })
            .expect("an error tool_call_end event");
        assert_eq!(denied["code"], "TOOL_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn unknown_tool_is_hallucination_result() {
        let provider = Arc::new(
            MockProvider::new("mock-model")
                .then_tool_call("c1", "teleport", json!({}), 10, 5)
                .then_text("No such tool.", 12, 4),
        );
        let outcome = runner().run_turn(provider, request(&["teleport"])).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].is_error);
        assert_eq!(outcome.tool_calls[0].result["code"], "TOOL_HALLUCINATION");
    }

    #[tokio::test]
    async fn max_turns_one_with_tool_request() {
        let provider = Arc::new(MockProvider::new("mock-model").then_tool_call(
            "c1",
            "calculator",
            json!({"expression": "1+1"}),
            10,
            5,
        ));
        let mut request = request(&["calculator"]);
        request.agent_config.cost_config.max_turns_per_session = 1;

        let outcome = runner().run_turn(provider, request).await;
        assert_eq!(outcome.trace.status, TraceStatus::MaxTurns);
        // The pending call was never executed.
        let executed = outcome
            .trace
            .events
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::ToolCallEnd { .. }))
            .count();
        assert!(executed <= 1);
    }

    #[tokio::test]
    async fn tool_call_ceiling_truncates_extras() {
        let steps = vec![
            ScriptStep::Event(StreamEvent::MessageStart),
            ScriptStep::Event(StreamEvent::ToolUseEnd {
                id: "c1".to_owned(),
                name: "calculator".to_owned(),
                input: json!({"expression": "1+1"}),
            }),
            ScriptStep::Event(StreamEvent::ToolUseEnd {
                id: "c2".to_owned(),
                name: "calculator".to_owned(),
                input: json!({"expression": "2+2"}),
            }),
            ScriptStep::Event(StreamEvent::MessageEnd {
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            }),
        ];
        let provider = Arc::new(MockProvider::new("mock-model").then_steps(steps));
        let mut request = request(&["calculator"]);
        request.agent_config.cost_config.max_tool_calls_per_turn = 1;

        let outcome = runner().run_turn(provider, request).await;
        assert_eq!(outcome.trace.status, TraceStatus::MaxTurns);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].input["expression"], "1+1");
    }

    #[tokio::test]
    async fn budget_precheck_failure_makes_no_provider_call() {
        let provider = Arc::new(MockProvider::new("mock-model").then_text("never", 1, 1));
        let calls = provider.call_count();

        let guard = CostGuard::new(Arc::new(InMemoryUsageStore::new()));
        // Spend past the budget before the turn.
        guard
            .record_usage("p1", "s0", "t0", 0, 1_000_000, 0, "unknown-model")
            .unwrap();
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        let runner = AgentRunner::new(Arc::new(registry), Arc::new(guard));

        let mut request = request(&[]);
        request.agent_config.cost_config.daily_budget_usd = 0.01;

        let outcome = runner.run_turn(provider, request).await;
        assert_eq!(outcome.trace.status, TraceStatus::BudgetExceeded);
        assert_eq!(
            outcome.error.as_ref().map(|(code, _)| *code),
            Some(ErrorCode::BudgetExceeded)
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_keeps_partial_text() {
        let steps = vec![
            ScriptStep::Event(StreamEvent::MessageStart),
            ScriptStep::Event(StreamEvent::ContentDelta {
                text: "partial ".to_owned(),
            }),
            ScriptStep::Event(StreamEvent::ContentDelta {
                text: "answer".to_owned(),
            }),
            ScriptStep::Delay(Duration::from_secs(60)),
            ScriptStep::Event(StreamEvent::MessageEnd {
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage::default(),
            }),
        ];
        let provider = Arc::new(MockProvider::new("mock-model").then_steps(steps));
        let request = request(&[]);
        let abort = request.abort.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort.abort();
        });

        let outcome = runner().run_turn(provider, request).await;
        assert_eq!(outcome.trace.status, TraceStatus::Cancelled);
        assert_eq!(
            outcome.error.as_ref().map(|(code, _)| *code),
            Some(ErrorCode::Cancelled)
        );

        // Deltas recorded up to the abort; the cancellation error event too.
        let deltas = outcome
            .trace
            .events
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::LlmDelta { .. }))
            .count();
        assert_eq!(deltas, 2);
        assert!(outcome.trace.events.iter().any(|r| matches!(
            &r.event,
            TraceEvent::Error {
                code: ErrorCode::Cancelled,
                ..
            }
        )));
        // The stored assistant message carries the partial text.
        assert_eq!(outcome.assistant_text, "partial answer");
        let texts: Vec<String> = outcome
            .new_messages
            .iter()
            .map(|m| m.content.text())
            .collect();
        assert!(texts.contains(&"partial answer".to_owned()));
    }

    #[tokio::test]
    async fn provider_failure_after_retries_fails_turn() {
        let provider = Arc::new(MockProvider::new("mock-model").fail_once(ProviderError::Auth {
            message: "bad key".to_owned(),
        }));
        let outcome = runner().run_turn(provider, request(&[])).await;
        assert_eq!(outcome.trace.status, TraceStatus::Failed);
        assert_eq!(
            outcome.error.as_ref().map(|(code, _)| *code),
            Some(ErrorCode::ProviderError)
        );
    }

    #[tokio::test]
    async fn malformed_tool_input_surfaces_as_failed_call() {
        let steps = vec![
            ScriptStep::Event(StreamEvent::MessageStart),
            ScriptStep::Event(StreamEvent::ToolUseStart {
                id: "c1".to_owned(),
                name: "calculator".to_owned(),
            }),
            ScriptStep::Error(ProviderError::parse("unterminated string")),
            ScriptStep::Event(StreamEvent::MessageEnd {
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage {
                    input_tokens: 8,
                    output_tokens: 2,
                },
            }),
        ];
        let provider = Arc::new(
            MockProvider::new("mock-model")
                .then_steps(steps)
                .then_text("Let me try again without the tool.", 10, 5),
        );
        let outcome = runner()
            .run_turn(provider, request(&["calculator"]))
            .await;

        assert!(outcome.succeeded(), "parse failure must not crash the turn");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].is_error);
        assert_eq!(
            outcome.tool_calls[0].result["code"],
            "TOOL_INPUT_VALIDATION"
        );
    }

    #[tokio::test]
    async fn per_run_budget_stops_between_turns() {
        let provider = Arc::new(
            MockProvider::new("mock-model")
                .then_tool_call("c1", "calculator", json!({"expression": "1+1"}), 500_000, 100)
                .then_text("done", 10, 5),
        );
        let mut request = request(&["calculator"]);
        // First call costs ~$5 on default pricing; ceiling is $1.
        request.per_run_budget_usd = Some(1.0);
        request.agent_config.provider.model = "unknown-model".to_owned();
        request.agent_config.cost_config.daily_budget_usd = 1_000.0;
        request.agent_config.cost_config.monthly_budget_usd = 10_000.0;
        request.agent_config.cost_config.max_tokens_per_turn = 1_000_000;

        let outcome = runner().run_turn(provider, request).await;
        assert_eq!(outcome.trace.status, TraceStatus::BudgetExceeded);
    }

    #[tokio::test]
    async fn pruned_history_does_not_leak_into_new_messages() {
        let provider = Arc::new(MockProvider::new("mock-model").then_text("ok", 5, 2));
        let mut request = request(&[]);
        // A long prior history that the pruner will shrink.
        for i in 0..30 {
            request
                .conversation_history
                .push(ChatMessage::user(format!("old question {i} {}", "x".repeat(400))));
            request
                .conversation_history
                .push(ChatMessage::assistant(format!("old answer {i} {}", "y".repeat(400))));
        }
        request.agent_config.memory_config.context_window.max_turns_in_context = 3;

        let outcome = runner().run_turn(provider, request).await;
        assert!(outcome.succeeded());
        // Exactly the new user message and the assistant reply.
        assert_eq!(outcome.new_messages.len(), 2);
        assert_eq!(outcome.new_messages[0].content.text(), "Hi");
        assert_eq!(outcome.new_messages[1].content.text(), "ok");
    }

    #[tokio::test]
    async fn completed_trace_iff_no_error_and_end_turn() {
        let provider = Arc::new(MockProvider::new("mock-model").then_text("ok", 5, 2));
        let outcome = runner().run_turn(provider, request(&[])).await;

        let has_error_event = outcome
            .trace
            .events
            .iter()
            .any(|r| matches!(r.event, TraceEvent::Error { .. }));
        let final_stop = outcome.trace.events.iter().rev().find_map(|r| match &r.event {
            TraceEvent::MessageEnd { stop_reason, .. } => Some(*stop_reason),
            _ => None,
        });
        assert_eq!(outcome.trace.status, TraceStatus::Completed);
        assert!(!has_error_event);
        assert_eq!(final_stop, Some(StopReason::EndTurn));
    }
}
