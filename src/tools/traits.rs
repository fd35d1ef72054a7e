//! Tool capability traits and the execution context.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::signal::AbortSignal;
use crate::error::{ErrorCode, ValidationIssue};

// ─── RiskLevel ────────────────────────────────────────────────────────────────

/// Risk tier of a tool; drives approval requirements and audit emphasis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

// ─── ToolSpec ─────────────────────────────────────────────────────────────────

/// Static description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Stable machine identifier, e.g. `"calculator"`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub side_effects: bool,
    pub supports_dry_run: bool,
}

// ─── ToolContext ──────────────────────────────────────────────────────────────

/// What the caller is allowed to invoke.
#[derive(Debug, Clone, Default)]
pub struct ToolPermissions {
    pub allowed_tools: BTreeSet<String>,
}

impl ToolPermissions {
    pub fn allowing<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self {
        Self {
            allowed_tools: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, tool_id: &str) -> bool {
        self.allowed_tools.contains(tool_id)
    }
}

/// Per-invocation context handed to tools. Implementations must observe
/// `abort` at their suspension points.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_id: String,
    pub session_id: String,
    pub permissions: ToolPermissions,
    pub abort: AbortSignal,
}

impl ToolContext {
    pub fn new(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        permissions: ToolPermissions,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            session_id: session_id.into(),
            permissions,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

// ─── ToolError / ToolOutcome ──────────────────────────────────────────────────

/// Failure of a tool resolution. These are agent-visible: the runner folds
/// them into error tool results and continues, except `Cancelled`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{tool_id}' is not in the allowlist")]
    NotAllowed { tool_id: String },

    #[error("tool '{tool_id}' does not exist")]
    Hallucination { tool_id: String },

    #[error("tool input failed validation")]
    InputValidation { issues: Vec<ValidationIssue> },

    #[error("approval {approval_id} was denied")]
    ApprovalDenied { approval_id: String },

    #[error("approval {approval_id} expired")]
    ApprovalExpired { approval_id: String },

    #[error("tool '{tool_id}' failed: {message}")]
    Execution { tool_id: String, message: String },

    #[error("tool '{tool_id}' does not support dry-run")]
    DryRunUnsupported { tool_id: String },

    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(tool_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Execution {
            tool_id: tool_id.into(),
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAllowed { .. } => ErrorCode::ToolNotAllowed,
            Self::Hallucination { .. } => ErrorCode::ToolHallucination,
            Self::InputValidation { .. } => ErrorCode::ToolInputValidation,
            Self::ApprovalDenied { .. } => ErrorCode::ApprovalDenied,
            Self::ApprovalExpired { .. } => ErrorCode::ApprovalExpired,
            Self::Execution { .. } | Self::DryRunUnsupported { .. } => {
                ErrorCode::ToolExecutionError
            }
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// The payload stored in the trace and fed back to the model.
    pub fn to_output(&self) -> Value {
        serde_json::json!({
            "code": self.code().as_str(),
            "message": self.to_string(),
        })
    }
}

/// Successful tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Value,
    pub duration_ms: u64,
}

// ─── Tool ─────────────────────────────────────────────────────────────────────

/// An executable capability.
///
/// Implementations may perform I/O; they must respect `ctx.abort` and, when
/// `side_effects` is false, produce deterministic output for identical
/// `(input, ctx.project_id)`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Side-effect-free simulation. Default: unsupported.
    async fn dry_run(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::DryRunUnsupported {
            tool_id: self.spec().id.clone(),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
