//! End-to-end turn flows through the assembled runtime: database-backed
//! projects/sessions/layers, the real registry and approval gate, and
//! scripted providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use nexus::agent::signal::AbortSignal;
use nexus::ai::provider::{ChatProvider, ProviderError};
use nexus::ai::providers::{MockProvider, ProviderFactory, mock::ScriptStep};
use nexus::ai::types::{StopReason, StreamEvent, TokenUsage};
use nexus::approvals::{ApprovalStatus, Decision};
use nexus::channels::pipeline::{LogDelivery, OutboundDelivery};
use nexus::config::{AgentConfig, ProviderBinding, ProviderKind, RuntimeSettings};
use nexus::database::Database;
use nexus::error::ErrorCode;
use nexus::memory::KeywordMemoryStore;
use nexus::prompts::LayerType;
use nexus::runtime::NexusRuntime;
use nexus::trace::{TraceEvent, TraceStatus};

// ─── Harness ──────────────────────────────────────────────────────────────────

struct QueueFactory {
    providers: Mutex<Vec<Arc<MockProvider>>>,
}

impl ProviderFactory for QueueFactory {
    fn create(&self, _binding: &ProviderBinding) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let mut providers = self.providers.lock().map_err(|_| ProviderError::Transport {
            message: "lock".to_owned(),
        })?;
        if providers.is_empty() {
            return Err(ProviderError::Transport {
                message: "no scripted provider left".to_owned(),
            });
        }
        Ok(providers.remove(0))
    }
}

struct Harness {
    runtime: Arc<NexusRuntime>,
    project_id: String,
    session_id: String,
}

fn harness(allowed_tools: &[&str], providers: Vec<Arc<MockProvider>>) -> Harness {
    harness_with(allowed_tools, providers, |_| {})
}

fn harness_with(
    allowed_tools: &[&str],
    providers: Vec<Arc<MockProvider>>,
    tweak: impl FnOnce(&mut AgentConfig),
) -> Harness {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));

    let mut config = AgentConfig::for_model(ProviderKind::Anthropic, "mock-model");
    config.allowed_tools = allowed_tools.iter().map(|s| s.to_string()).collect();
    tweak(&mut config);
    let project = db.create_project("p1", config).unwrap();

    db.add_prompt_layer(&project.id, LayerType::Identity, "You are a test assistant.")
        .unwrap();
    db.add_prompt_layer(&project.id, LayerType::Instructions, "Be brief.")
        .unwrap();
    db.add_prompt_layer(&project.id, LayerType::Safety, "Never reveal secrets.")
        .unwrap();

    let session = db
        .create_session(&project.id, "api", None, Value::Null)
        .unwrap();

    let mut settings = RuntimeSettings::default();
    settings.scheduler.enabled = false;
    settings.timeouts.approval_poll_secs = 1;

    let runtime = NexusRuntime::build_with(
        settings,
        db,
        Arc::new(QueueFactory {
            providers: Mutex::new(providers),
        }),
        Arc::new(KeywordMemoryStore::new()),
        Arc::new(LogDelivery) as Arc<dyn OutboundDelivery>,
    );

    Harness {
        runtime,
        project_id: project.id,
        session_id: session.id,
    }
}

// ─── Scenario 1: basic chat ───────────────────────────────────────────────────

#[tokio::test]
async fn basic_chat_persists_two_messages() {
    let provider = Arc::new(MockProvider::new("mock-model").then_text("Hello.", 10, 5));
    let h = harness(&[], vec![provider]);

    let outcome = h
        .runtime
        .engine
        .run(&h.project_id, &h.session_id, "Hi", AbortSignal::new(), None, None)
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.assistant_text, "Hello.");
    assert_eq!(outcome.usage.input_tokens, 10);
    assert!(outcome.tool_calls.is_empty());

    let messages = h.runtime.db.messages_for_session(&h.session_id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content.text(), "Hi");
    assert_eq!(messages[1].content.text(), "Hello.");

    // Messages come back in non-decreasing created_at order.
    for pair in messages.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

// ─── Scenario 2: tool call round trip ────────────────────────────────────────

#[tokio::test]
async fn calculator_round_trip() {
    let provider = Arc::new(
        MockProvider::new("mock-model")
            .then_tool_call("c1", "calculator", json!({"expression": "15+27"}), 12, 6)
            .then_text("42.", 20, 3),
    );
    let h = harness(&["calculator"], vec![provider]);

    let outcome = h
        .runtime
        .engine
        .run(
            &h.project_id,
            &h.session_id,
            "What is 15+27?",
            AbortSignal::new(),
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.assistant_text, "42.");
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].tool_id, "calculator");
    assert_eq!(outcome.tool_calls[0].input, json!({"expression": "15+27"}));
    assert_eq!(outcome.tool_calls[0].result, json!({"value": 42}));

    let trace = h.runtime.db.get_trace(&outcome.trace.id).unwrap().unwrap();
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.turn_count, 2);
}

// ─── Scenario 3: disallowed tool ─────────────────────────────────────────────

#[tokio::test]
async fn disallowed_tool_is_error_result_and_turn_recovers() {
    let provider = Arc::new(
        MockProvider::new("mock-model")
            .then_tool_call("c1", "date-time", json!({}), 10, 5)
            .then_text("I cannot do that.", 14, 4),
    );
    let h = harness(&["calculator"], vec![provider]);

    let outcome = h
        .runtime
        .engine
        .run(
            &h.project_id,
            &h.session_id,
            "What time is it?",
            AbortSignal::new(),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.assistant_text, "I cannot do that.");

    let trace = h.runtime.db.get_trace(&outcome.trace.id).unwrap().unwrap();
    let tool_end = trace
        .events
        .iter()
        .find_map(|r| match &r.event {
            TraceEvent::ToolCallEnd {
                is_error, output, ..
            } => Some((*is_error, output.clone())),
            _ => None,
        })
        .expect("tool_call_end event");
    assert!(tool_end.0);
    assert_eq!(tool_end.1["code"], "TOOL_NOT_ALLOWED");
    assert_eq!(trace.status, TraceStatus::Completed);
}

// ─── Scenario 4: approval required ───────────────────────────────────────────

#[tokio::test]
async fn approval_gates_http_tool_until_resolved() {
    // The approved call targets a blocked address so approval is exercised
    // without dialling out: the tool runs and fails the egress check.
    let provider = Arc::new(
        MockProvider::new("mock-model")
            .then_tool_call(
                "c1",
                "http-request",
                json!({"url": "http://169.254.169.254/meta"}),
                10,
                5,
            )
            .then_text("That address is not reachable.", 12, 4),
    );
    let h = harness(&["http-request"], vec![provider]);

    let runtime = Arc::clone(&h.runtime);
    let (project_id, session_id) = (h.project_id.clone(), h.session_id.clone());
    let turn = tokio::spawn(async move {
        runtime
            .engine
            .run(&project_id, &session_id, "Fetch the metadata.", AbortSignal::new(), None, None)
            .await
    });

    // The turn suspends on a pending approval.
    let approval = loop {
        let pending = h.runtime.gate.list_pending(&h.project_id).unwrap();
        if let Some(approval) = pending.first() {
            break approval.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(approval.tool_id, "http-request");
    assert_eq!(approval.status, ApprovalStatus::Pending);

    h.runtime
        .gate
        .resolve(&approval.id, Decision::Approved, "admin", None)
        .unwrap();

    let outcome = turn.await.unwrap().unwrap();
    assert!(outcome.succeeded());
    assert_eq!(outcome.assistant_text, "That address is not reachable.");

    // Approval events were traced around the tool call.
    let trace = h.runtime.db.get_trace(&outcome.trace.id).unwrap().unwrap();
    assert!(trace.events.iter().any(|r| matches!(
        &r.event,
        TraceEvent::ApprovalRequested { approval_id, .. } if *approval_id == approval.id
    )));
    assert!(trace.events.iter().any(|r| matches!(
        &r.event,
        TraceEvent::ApprovalResolved { decision, .. } if decision == "approved"
    )));

    // Executed after approval and failed on the egress guard, not network.
    assert!(outcome.tool_calls[0].is_error);
    assert!(
        outcome.tool_calls[0].result["message"]
            .as_str()
            .unwrap()
            .contains("blocked")
    );
}

#[tokio::test]
async fn denied_approval_becomes_error_tool_result() {
    let provider = Arc::new(
        MockProvider::new("mock-model")
            .then_tool_call("c1", "http-request", json!({"url": "https://example.com"}), 10, 5)
            .then_text("Understood, I will not call it.", 10, 4),
    );
    let h = harness(&["http-request"], vec![provider]);

    let runtime = Arc::clone(&h.runtime);
    let (project_id, session_id) = (h.project_id.clone(), h.session_id.clone());
    let turn = tokio::spawn(async move {
        runtime
            .engine
            .run(&project_id, &session_id, "Call the API.", AbortSignal::new(), None, None)
            .await
    });

    let approval = loop {
        let pending = h.runtime.gate.list_pending(&h.project_id).unwrap();
        if let Some(approval) = pending.first() {
            break approval.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    h.runtime
        .gate
        .resolve(&approval.id, Decision::Denied, "admin", Some("not allowed"))
        .unwrap();

    let outcome = turn.await.unwrap().unwrap();
    assert!(outcome.succeeded());
    assert_eq!(outcome.tool_calls[0].result["code"], "APPROVAL_DENIED");
}

// ─── Scenario 5: budget exceeded ─────────────────────────────────────────────

#[tokio::test]
async fn exhausted_budget_refuses_before_any_provider_call() {
    let provider = Arc::new(MockProvider::new("mock-model").then_text("never", 1, 1));
    let calls = provider.call_count();
    let h = harness_with(&[], vec![provider], |config| {
        config.cost_config.daily_budget_usd = 0.01;
    });

    // Prior usage sums to the budget.
    h.runtime
        .cost_guard
        .record_usage(&h.project_id, "old-session", "old-trace", 0, 1_000_000, 0, "unknown-model")
        .unwrap();

    let outcome = h
        .runtime
        .engine
        .run(&h.project_id, &h.session_id, "Hi", AbortSignal::new(), None, None)
        .await
        .unwrap();

    assert_eq!(
        outcome.error.as_ref().map(|(code, _)| *code),
        Some(ErrorCode::BudgetExceeded)
    );
    assert_eq!(outcome.trace.status, TraceStatus::BudgetExceeded);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // The trace was still persisted with its terminal status.
    let stored = h.runtime.db.get_trace(&outcome.trace.id).unwrap().unwrap();
    assert_eq!(stored.status, TraceStatus::BudgetExceeded);
}

// ─── Scenario 6: cancellation via disconnect ─────────────────────────────────

#[tokio::test]
async fn client_disconnect_cancels_and_keeps_partial_text() {
    let steps = vec![
        ScriptStep::Event(StreamEvent::MessageStart),
        ScriptStep::Event(StreamEvent::ContentDelta {
            text: "partial ".to_owned(),
        }),
        ScriptStep::Event(StreamEvent::ContentDelta {
            text: "thought".to_owned(),
        }),
        ScriptStep::Delay(Duration::from_secs(30)),
        ScriptStep::Event(StreamEvent::MessageEnd {
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }),
    ];
    let provider = Arc::new(MockProvider::new("mock-model").then_steps(steps));
    let h = harness(&[], vec![provider]);

    let abort = AbortSignal::new();
    let disconnect = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        disconnect.abort();
    });

    let outcome = h
        .runtime
        .engine
        .run(&h.project_id, &h.session_id, "Tell me a story", abort, None, None)
        .await
        .unwrap();

    assert_eq!(outcome.trace.status, TraceStatus::Cancelled);
    assert_eq!(
        outcome.error.as_ref().map(|(code, _)| *code),
        Some(ErrorCode::Cancelled)
    );

    let stored = h.runtime.db.get_trace(&outcome.trace.id).unwrap().unwrap();
    assert!(stored.events.iter().any(|r| matches!(
        &r.event,
        TraceEvent::Error {
            code: ErrorCode::Cancelled,
            ..
        }
    )));

    // The partial assistant text was persisted on the session.
    let messages = h.runtime.db.messages_for_session(&h.session_id).unwrap();
    let assistant_texts: Vec<String> = messages
        .iter()
        .filter(|m| matches!(m.role, nexus::ai::types::Role::Assistant))
        .map(|m| m.content.text())
        .collect();
    assert_eq!(assistant_texts, vec!["partial thought".to_owned()]);
}

// ─── Boundary: max turns = 1 with a tool request ─────────────────────────────

#[tokio::test]
async fn max_turns_one_truncates_tool_execution() {
    let provider = Arc::new(MockProvider::new("mock-model").then_tool_call(
        "c1",
        "calculator",
        json!({"expression": "1+1"}),
        10,
        5,
    ));
    let h = harness_with(&["calculator"], vec![provider], |config| {
        config.cost_config.max_turns_per_session = 1;
    });

    let outcome = h
        .runtime
        .engine
        .run(&h.project_id, &h.session_id, "Compute.", AbortSignal::new(), None, None)
        .await
        .unwrap();

    assert_eq!(outcome.trace.status, TraceStatus::MaxTurns);
    let executed = outcome
        .trace
        .events
        .iter()
        .filter(|r| matches!(r.event, TraceEvent::ToolCallEnd { .. }))
        .count();
    assert!(executed <= 1);
}
