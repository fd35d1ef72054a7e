//! HTTP gateway: the axum router over the runtime.

pub mod approvals;
pub mod chat;
pub mod envelope;
pub mod sessions;
pub mod tools;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use log::info;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{NexusError, NexusResult};
use crate::runtime::NexusRuntime;

/// Build the full route table.
pub fn router(runtime: Arc<NexusRuntime>) -> Router {
    let api = Router::new()
        .route("/chat", post(chat::chat))
        .route("/projects/:id/sessions", post(sessions::create_session).get(sessions::list_project_sessions))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id/status", patch(sessions::patch_session_status))
        .route("/sessions/:id/messages", get(sessions::list_session_messages))
        .route("/projects/:id/approvals/pending", get(approvals::list_pending))
        .route("/approvals/:id", get(approvals::get_approval))
        .route("/approvals/:id/resolve", post(approvals::resolve_approval))
        .route("/tools", get(tools::list_tools))
        .route("/tools/categories", get(tools::list_categories))
        .route("/tools/:id", get(tools::get_tool))
        .route("/agents/:id/tools", get(tools::get_agent_tools).put(tools::put_agent_tools))
        .with_state(Arc::clone(&runtime));

    let hooks = Router::new()
        .route("/webhooks/chatwoot", post(webhooks::chatwoot_webhook))
        .route("/webhooks/whatsapp/:id/verify", get(webhooks::whatsapp_verify))
        .route("/webhooks/:provider/:id", post(webhooks::inbound_webhook))
        .with_state(runtime);

    Router::new()
        .nest("/api/v1", api)
        .merge(hooks)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the process is signalled.
pub async fn serve(runtime: Arc<NexusRuntime>) -> NexusResult<()> {
    let addr = runtime.settings.gateway.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| NexusError::internal(format!("failed to bind {addr}: {e}")))?;
    info!("gateway listening on {addr}");

    axum::serve(listener, router(runtime))
        .await
        .map_err(|e| NexusError::internal(format!("gateway server error: {e}")))
}
