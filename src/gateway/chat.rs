//! `POST /api/v1/chat` — the synchronous chat endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::signal::AbortSignal;
use crate::error::{NexusError, ValidationIssue};
use crate::runtime::NexusRuntime;

use super::envelope::{ApiResult, error_response, success};

pub const MAX_MESSAGE_CHARS: usize = 100_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub project_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Request-shape validation, split out so the boundary is testable.
fn validate_body(body: &ChatRequestBody) -> Result<(), NexusError> {
    let mut issues = Vec::new();
    if body.project_id.is_empty() {
        issues.push(ValidationIssue::new("projectId", "must not be empty"));
    }
    let chars = body.message.chars().count();
    if chars == 0 {
        issues.push(ValidationIssue::new("message", "must not be empty"));
    } else if chars > MAX_MESSAGE_CHARS {
        issues.push(ValidationIssue::new(
            "message",
            format!("must be at most {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(NexusError::Validation {
            message: "invalid chat request".to_owned(),
            issues,
        })
    }
}

pub async fn chat(
    State(runtime): State<Arc<NexusRuntime>>,
    Json(body): Json<ChatRequestBody>,
) -> ApiResult<Response> {
    validate_body(&body)?;

    runtime
        .db
        .get_project(&body.project_id)?
        .ok_or_else(|| NexusError::not_found(format!("project {}", body.project_id)))?;

    // Resolve or open the session.
    let session = match &body.session_id {
        Some(id) => runtime
            .db
            .get_session(id)?
            .ok_or_else(|| NexusError::not_found(format!("session {id}")))?,
        None => runtime.db.create_session(
            &body.project_id,
            "api",
            None,
            body.metadata.clone().unwrap_or(Value::Null),
        )?,
    };

    let abort = AbortSignal::timeout(Duration::from_secs(runtime.settings.timeouts.turn_secs));
    let outcome = runtime
        .engine
        .run(
            &body.project_id,
            &session.id,
            &body.message,
            abort,
            None,
            None,
        )
        .await?;

    if let Some((code, message)) = &outcome.error {
        return Ok(error_response(
            *code,
            message,
            Some(json!({ "traceId": outcome.trace.id, "sessionId": session.id })),
        ));
    }

    Ok(success(json!({
        "sessionId": session.id,
        "traceId": outcome.trace.id,
        "response": outcome.assistant_text,
        "toolCalls": outcome.tool_calls,
        "usage": {
            "inputTokens": outcome.usage.input_tokens,
            "outputTokens": outcome.usage.output_tokens,
            "costUSD": outcome.trace.total_cost_usd,
        },
    })))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn body(message: String) -> ChatRequestBody {
        ChatRequestBody {
            project_id: "p1".to_owned(),
            session_id: None,
            message,
            metadata: None,
        }
    }

    #[test]
    fn message_at_the_limit_passes() {
        assert!(validate_body(&body("x".repeat(MAX_MESSAGE_CHARS))).is_ok());
    }

    #[test]
    fn message_over_the_limit_fails_validation() {
        let err = validate_body(&body("x".repeat(MAX_MESSAGE_CHARS + 1))).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
        assert_eq!(err.issues()[0].path, "message");
    }

    #[test]
    fn empty_message_and_project_report_both_issues() {
        let mut request = body(String::new());
        request.project_id = String::new();
        let err = validate_body(&request).unwrap_err();
        assert_eq!(err.issues().len(), 2);
    }
}
