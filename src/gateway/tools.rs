//! Tool catalog and per-agent allowlist endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;

use crate::error::NexusError;
use crate::runtime::NexusRuntime;

use super::envelope::{ApiResult, success};

pub async fn list_tools(State(runtime): State<Arc<NexusRuntime>>) -> ApiResult<Response> {
    Ok(success(runtime.registry.list_all()))
}

pub async fn list_categories(State(runtime): State<Arc<NexusRuntime>>) -> ApiResult<Response> {
    Ok(success(runtime.registry.categories()))
}

pub async fn get_tool(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(tool_id): Path<String>,
) -> ApiResult<Response> {
    let tool = runtime
        .registry
        .get(&tool_id)
        .ok_or_else(|| NexusError::not_found(format!("tool {tool_id}")))?;
    Ok(success(tool.spec().clone()))
}

pub async fn get_agent_tools(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(project_id): Path<String>,
) -> ApiResult<Response> {
    let project = runtime
        .db
        .get_project(&project_id)?
        .ok_or_else(|| NexusError::not_found(format!("project {project_id}")))?;
    Ok(success(json!({
        "tools": project.agent_config.allowed_tools,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutToolsBody {
    pub tools: Vec<String>,
}

pub async fn put_agent_tools(
    State(runtime): State<Arc<NexusRuntime>>,
    Path(project_id): Path<String>,
    Json(body): Json<PutToolsBody>,
) -> ApiResult<Response> {
    let unknown: Vec<String> = body
        .tools
        .iter()
        .filter(|id| !runtime.registry.has(id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(NexusError::UnknownTools { ids: unknown }.into());
    }

    let project = runtime
        .db
        .get_project(&project_id)?
        .ok_or_else(|| NexusError::not_found(format!("project {project_id}")))?;
    let mut config = project.agent_config;
    config.allowed_tools = body.tools.into_iter().collect::<BTreeSet<String>>();
    let updated = runtime.db.update_project_config(&project_id, &config)?;
    Ok(success(json!({
        "tools": updated.agent_config.allowed_tools,
    })))
}
