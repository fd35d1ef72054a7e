//! Approval endpoints: listing, inspection, and external resolution.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;

use crate::approvals::Decision;
use crate::error::{ErrorCode, NexusError};
use crate::runtime::NexusRuntime;

use super::envelope::{ApiResult, error_response, success};

pub async fn list_pending(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(project_id): Path<String>,
) -> ApiResult<Response> {
    let pending = runtime.gate.list_pending(&project_id)?;
    Ok(success(pending))
}

pub async fn get_approval(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(approval_id): Path<String>,
) -> ApiResult<Response> {
    let approval = runtime
        .gate
        .get(&approval_id)?
        .ok_or_else(|| NexusError::not_found(format!("approval {approval_id}")))?;
    Ok(success(approval))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    pub decision: String,
    pub resolved_by: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn resolve_approval(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(approval_id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<Response> {
    let decision = match body.decision.as_str() {
        "approved" => Decision::Approved,
        "denied" => Decision::Denied,
        other => {
            return Err(NexusError::validation(format!(
                "decision must be 'approved' or 'denied', got '{other}'"
            ))
            .into());
        }
    };

    match runtime.gate.resolve(
        &approval_id,
        decision,
        &body.resolved_by,
        body.note.as_deref(),
    ) {
        Ok(approval) => Ok(success(approval)),
        // 409 carries the state the first resolve produced.
        Err(e) if e.code() == ErrorCode::ApprovalNotPending => {
            let current = runtime.gate.get(&approval_id)?;
            let current_status = current.map(|a| a.status.as_str().to_owned());
            Ok(error_response(
                ErrorCode::ApprovalNotPending,
                &e.to_string(),
                Some(json!({ "currentStatus": current_status })),
            ))
        }
        Err(e) => Err(e.into()),
    }
}
