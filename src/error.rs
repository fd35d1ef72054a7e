//! Error taxonomy for the Nexus runtime.
//!
//! Every fallible core operation returns a typed error that carries one of
//! the wire codes below. The gateway maps codes to HTTP statuses; the agent
//! runner maps tool-level failures into error tool results and keeps going,
//! while budget/rate/cancellation errors terminate the turn.

use serde::{Deserialize, Serialize};

// ─── ErrorCode ────────────────────────────────────────────────────────────────

/// Stable machine-readable error codes surfaced in API envelopes and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    ChannelCollision,
    ApprovalNotPending,
    NoActivePrompt,
    ToolNotAllowed,
    ToolHallucination,
    ToolInputValidation,
    ToolExecutionError,
    ApprovalDenied,
    ApprovalExpired,
    BudgetExceeded,
    TokenLimitExceeded,
    TurnLimitExceeded,
    RateLimitExceeded,
    ProviderError,
    Cancelled,
    UnknownTools,
    InternalError,
}

impl ErrorCode {
    /// The wire form, e.g. `"BUDGET_EXCEEDED"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ChannelCollision => "CHANNEL_COLLISION",
            Self::ApprovalNotPending => "APPROVAL_NOT_PENDING",
            Self::NoActivePrompt => "NO_ACTIVE_PROMPT",
            Self::ToolNotAllowed => "TOOL_NOT_ALLOWED",
            Self::ToolHallucination => "TOOL_HALLUCINATION",
            Self::ToolInputValidation => "TOOL_INPUT_VALIDATION",
            Self::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            Self::ApprovalDenied => "APPROVAL_DENIED",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::TokenLimitExceeded => "TOKEN_LIMIT_EXCEEDED",
            Self::TurnLimitExceeded => "TURN_LIMIT_EXCEEDED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::UnknownTools => "UNKNOWN_TOOLS",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Default HTTP status for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError | Self::NoActivePrompt => 400,
            Self::ToolNotAllowed => 403,
            Self::NotFound => 404,
            Self::Conflict | Self::ChannelCollision | Self::ApprovalNotPending => 409,
            Self::BudgetExceeded
            | Self::TokenLimitExceeded
            | Self::TurnLimitExceeded
            | Self::RateLimitExceeded => 429,
            Self::ProviderError => 502,
            Self::ToolHallucination
            | Self::ToolInputValidation
            | Self::ToolExecutionError
            | Self::ApprovalDenied
            | Self::ApprovalExpired
            | Self::Cancelled
            | Self::UnknownTools => 400,
            Self::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ValidationIssue ──────────────────────────────────────────────────────────

/// One field-level validation failure, attached to `VALIDATION_ERROR` and
/// `TOOL_INPUT_VALIDATION` details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON-path of the offending field, e.g. `"expression"` or `"items[2]"`.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ─── NexusError ───────────────────────────────────────────────────────────────

/// Top-level runtime error. Subsystem errors (`ProviderError`, `ToolError`,
/// `DbError`) convert into this at the boundary where a turn or an API
/// request fails as a whole.
#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("conflict: {message}")]
    Conflict { code: ErrorCode, message: String },

    #[error("project '{project_id}' has no complete set of active prompt layers")]
    NoActivePrompt { project_id: String },

    #[error("budget exceeded: {message}")]
    BudgetExceeded { message: String },

    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String },

    #[error("turn limit exceeded: {message}")]
    TurnLimitExceeded { message: String },

    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("unknown tools: {ids:?}")]
    UnknownTools { ids: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl NexusError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            code: ErrorCode::Conflict,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict { code, .. } => *code,
            Self::NoActivePrompt { .. } => ErrorCode::NoActivePrompt,
            Self::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            Self::TokenLimitExceeded { .. } => ErrorCode::TokenLimitExceeded,
            Self::TurnLimitExceeded { .. } => ErrorCode::TurnLimitExceeded,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            Self::Provider { .. } => ErrorCode::ProviderError,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::UnknownTools { .. } => ErrorCode::UnknownTools,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Validation issues, if this error carries any.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation { issues, .. } => issues,
            _ => &[],
        }
    }
}

pub type NexusResult<T> = Result<T, NexusError>;

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_expected_statuses() {
        assert_eq!(ErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::ApprovalNotPending.http_status(), 409);
        assert_eq!(ErrorCode::BudgetExceeded.http_status(), 429);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::ProviderError.http_status(), 502);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::ToolNotAllowed.http_status(), 403);
    }

    #[test]
    fn wire_form_is_screaming_snake() {
        assert_eq!(ErrorCode::TokenLimitExceeded.as_str(), "TOKEN_LIMIT_EXCEEDED");
        assert_eq!(ErrorCode::NoActivePrompt.as_str(), "NO_ACTIVE_PROMPT");
        assert_eq!(ErrorCode::ChannelCollision.as_str(), "CHANNEL_COLLISION");
        // serde and as_str agree.
        assert_eq!(
            serde_json::to_string(&ErrorCode::ApprovalDenied).unwrap(),
            "\"APPROVAL_DENIED\""
        );
    }

    #[test]
    fn error_reports_its_code() {
        let err = NexusError::BudgetExceeded {
            message: "daily budget spent".to_owned(),
        };
        assert_eq!(err.code(), ErrorCode::BudgetExceeded);

        let err = NexusError::Conflict {
            code: ErrorCode::ApprovalNotPending,
            message: "already resolved".to_owned(),
        };
        assert_eq!(err.code(), ErrorCode::ApprovalNotPending);

        assert_eq!(NexusError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            NexusError::not_found("session s1").code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn constructors_fill_defaults() {
        assert_eq!(
            NexusError::conflict("duplicate name").code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            NexusError::validation("bad input").code(),
            ErrorCode::ValidationError
        );
        assert_eq!(
            NexusError::internal("boom").code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn validation_issues_attach() {
        let err = NexusError::Validation {
            message: "bad request".to_owned(),
            issues: vec![ValidationIssue::new("message", "too long")],
        };
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].path, "message");

        // Other variants expose no issues.
        assert!(NexusError::Cancelled.issues().is_empty());
    }
}
