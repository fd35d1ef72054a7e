//! Execution traces.
//!
//! A trace is the append-only record of everything that happened in one turn
//! sequence: prompt snapshot, every stream delta and tool call, errors, and
//! final aggregates. It is buffered in memory by [`TraceRecorder`] while the
//! turn runs and persisted atomically when it ends.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::registry;
use crate::ai::types::{StopReason, TokenUsage};
use crate::error::ErrorCode;
use crate::prompts::PromptSnapshot;

// ─── TraceStatus ──────────────────────────────────────────────────────────────

/// Terminal (and transient `running`) states of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    MaxTurns,
    BudgetExceeded,
    Cancelled,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::MaxTurns => "max_turns",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "max_turns" => Some(Self::MaxTurns),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

// ─── TraceEvent ───────────────────────────────────────────────────────────────

/// One event in a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    MessageStart,
    LlmDelta {
        text: String,
    },
    ToolCallStart {
        id: String,
        tool_id: String,
        input: Value,
    },
    ToolCallEnd {
        id: String,
        output: Value,
        is_error: bool,
        duration_ms: u64,
    },
    ApprovalRequested {
        tool_call_id: String,
        approval_id: String,
    },
    ApprovalResolved {
        approval_id: String,
        decision: String,
    },
    LlmResponse {
        text: String,
    },
    MessageEnd {
        stop_reason: StopReason,
        usage: TokenUsage,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// A trace event with its append timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TraceEvent,
}

// ─── ExecutionTrace ───────────────────────────────────────────────────────────

/// The persisted form of one turn sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub prompt_snapshot: PromptSnapshot,
    pub events: Vec<TraceEventRecord>,
    pub total_duration_ms: u64,
    pub total_tokens_used: u64,
    pub total_cost_usd: f64,
    pub turn_count: u32,
    pub status: TraceStatus,
    pub created_at: DateTime<Utc>,
}

impl ExecutionTrace {
    /// Concatenated assistant text, from the final `llm_response` event.
    pub fn response_text(&self) -> String {
        self.events
            .iter()
            .rev()
            .find_map(|r| match &r.event {
                TraceEvent::LlmResponse { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

// ─── TraceRecorder ────────────────────────────────────────────────────────────

struct RecorderState {
    events: Vec<TraceEventRecord>,
    turn_count: u32,
    total_tokens: u64,
    total_cost_usd: f64,
    status: TraceStatus,
}

/// In-memory, append-only trace buffer with incrementally maintained
/// aggregates. Shared between the runner and the tool resolver (which
/// records approval events), so all methods take `&self`.
pub struct TraceRecorder {
    id: String,
    project_id: String,
    session_id: String,
    prompt_snapshot: PromptSnapshot,
    created_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<RecorderState>,
}

impl TraceRecorder {
    pub fn start(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        prompt_snapshot: PromptSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            session_id: session_id.into(),
            prompt_snapshot,
            created_at: Utc::now(),
            started: Instant::now(),
            state: Mutex::new(RecorderState {
                events: Vec::new(),
                turn_count: 0,
                total_tokens: 0,
                total_cost_usd: 0.0,
                status: TraceStatus::Running,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append an event. Events are totally ordered by append time.
    pub fn record(&self, event: TraceEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.events.push(TraceEventRecord {
                at: Utc::now(),
                event,
            });
        }
    }

    /// Account one provider call: bump the turn counter and fold the call's
    /// usage into the aggregates at the model's pricing.
    pub fn record_turn_usage(&self, usage: TokenUsage, model: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.turn_count += 1;
            state.total_tokens += u64::from(usage.total());
            state.total_cost_usd +=
                registry::cost_of(model, usage.input_tokens, usage.output_tokens);
        }
    }

    pub fn turn_count(&self) -> u32 {
        self.state.lock().map(|s| s.turn_count).unwrap_or(0)
    }

    pub fn total_tokens(&self) -> u64 {
        self.state.lock().map(|s| s.total_tokens).unwrap_or(0)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.state.lock().map(|s| s.total_cost_usd).unwrap_or(0.0)
    }

    pub fn status(&self) -> TraceStatus {
        self.state
            .lock()
            .map(|s| s.status)
            .unwrap_or(TraceStatus::Running)
    }

    /// Set a terminal status. The first terminal status wins; later attempts
    /// are ignored so an error path cannot overwrite e.g. `cancelled`.
    pub fn set_status(&self, status: TraceStatus) {
        if let Ok(mut state) = self.state.lock()
            && state.status == TraceStatus::Running
        {
            state.status = status;
        }
    }

    /// Close the recorder into a persistable trace.
    pub fn finish(self) -> ExecutionTrace {
        let elapsed = self.started.elapsed();
        let state = self.state.into_inner().unwrap_or_else(|e| e.into_inner());
        ExecutionTrace {
            id: self.id,
            project_id: self.project_id,
            session_id: self.session_id,
            prompt_snapshot: self.prompt_snapshot,
            events: state.events,
            total_duration_ms: elapsed.as_millis() as u64,
            total_tokens_used: state.total_tokens,
            total_cost_usd: state.total_cost_usd,
            turn_count: state.turn_count,
            status: if state.status == TraceStatus::Running {
                TraceStatus::Completed
            } else {
                state.status
            },
            created_at: self.created_at,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
