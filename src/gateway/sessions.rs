//! Session CRUD endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;

use crate::database::models::SessionStatus;
use crate::error::NexusError;
use crate::runtime::NexusRuntime;

use super::envelope::{ApiResult, success};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn create_session(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Response> {
    runtime
        .db
        .get_project(&project_id)?
        .ok_or_else(|| NexusError::not_found(format!("project {project_id}")))?;
    let session = runtime.db.create_session(
        &project_id,
        "api",
        None,
        body.metadata.unwrap_or(Value::Null),
    )?;
    Ok(success(session))
}

pub async fn get_session(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    let session = runtime
        .db
        .get_session(&session_id)?
        .ok_or_else(|| NexusError::not_found(format!("session {session_id}")))?;
    Ok(success(session))
}

#[derive(Debug, Deserialize)]
pub struct PatchStatusBody {
    pub status: String,
}

pub async fn patch_session_status(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(session_id): Path<String>,
    Json(body): Json<PatchStatusBody>,
) -> ApiResult<Response> {
    let status = SessionStatus::parse(&body.status).ok_or_else(|| {
        NexusError::validation(format!(
            "unknown session status '{}'; expected active, paused or closed",
            body.status
        ))
    })?;
    let session = runtime.db.set_session_status(&session_id, status)?;
    Ok(success(session))
}

pub async fn list_session_messages(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    runtime
        .db
        .get_session(&session_id)?
        .ok_or_else(|| NexusError::not_found(format!("session {session_id}")))?;
    let messages = runtime.db.messages_for_session(&session_id)?;
    Ok(success(messages))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_project_sessions(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    runtime
        .db
        .get_project(&project_id)?
        .ok_or_else(|| NexusError::not_found(format!("project {project_id}")))?;
    let sessions = runtime
        .db
        .list_sessions(&project_id, query.limit, query.offset)?;
    Ok(success(sessions))
}
