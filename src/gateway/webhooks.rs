//! Inbound webhook endpoints.
//!
//! Platform ack budgets are tight (≤ 5 s), so handlers parse, enqueue on the
//! pipeline, and answer `200 {ok:true}` immediately; the turn runs on the
//! conversation worker. Payload parsing here is the minimal extraction of
//! `(conversation, text)`; full adapters live outside the core.
//!
//! Chatwoot requests are authenticated with an HMAC-SHA256 signature over
//! the raw body, compared in constant time.

use std::env;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::channels::pipeline::InboundMessage;
use crate::runtime::NexusRuntime;

type HmacSha256 = Hmac<Sha256>;

pub const CHATWOOT_SECRET_ENV: &str = "CHATWOOT_WEBHOOK_SECRET";
pub const WHATSAPP_VERIFY_TOKEN_ENV: &str = "WHATSAPP_VERIFY_TOKEN";

fn ok_ack() -> Response {
    Json(json!({ "ok": true })).into_response()
}

// ─── Generic channel webhooks ─────────────────────────────────────────────────

/// `POST /webhooks/{provider}/{integrationId}`.
///
/// Always acks `200 {ok:true}`; unparseable payloads are logged and
/// dropped so the platform does not retry forever.
pub async fn inbound_webhook(
    State(runtime): State<Arc<NexusRuntime>>,
    Path((provider, integration_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    if !matches!(provider.as_str(), "telegram" | "whatsapp" | "slack") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("webhook [{provider}/{integration_id}]: unparseable payload: {e}");
            return ok_ack();
        }
    };

    match extract_message(&provider, &payload) {
        Some((conversation_key, text)) => {
            debug!("webhook [{provider}/{integration_id}]: inbound from {conversation_key}");
            runtime.pipeline.dispatch(InboundMessage {
                // Integration routing is external; the integration id is the
                // project binding.
                project_id: integration_id,
                channel: provider,
                conversation_key,
                text,
            });
        }
        None => {
            // Delivery receipts, edits, joins: acked and ignored.
            debug!("webhook [{provider}/{integration_id}]: no message in payload");
        }
    }
    ok_ack()
}

/// Pull `(conversation, text)` out of a platform payload.
fn extract_message(provider: &str, payload: &Value) -> Option<(String, String)> {
    match provider {
        "telegram" => {
            let message = payload.get("message")?;
            let chat_id = message["chat"]["id"].as_i64()?;
            let text = message["text"].as_str()?;
            Some((chat_id.to_string(), text.to_owned()))
        }
        "whatsapp" => {
            let message = payload["entry"][0]["changes"][0]["value"]["messages"][0].as_object()?;
            let from = message.get("from")?.as_str()?;
            let text = message.get("text")?.get("body")?.as_str()?;
            Some((from.to_owned(), text.to_owned()))
        }
        "slack" => {
            let event = payload.get("event")?;
            if event["type"].as_str() != Some("message") || event.get("bot_id").is_some() {
                return None;
            }
            let channel = event["channel"].as_str()?;
            let text = event["text"].as_str()?;
            Some((channel.to_owned(), text.to_owned()))
        }
        _ => {
            // Generic shape used by tests and custom adapters.
            let conversation = payload["conversationId"].as_str()?;
            let text = payload["text"].as_str()?;
            Some((conversation.to_owned(), text.to_owned()))
        }
    }
}

// ─── WhatsApp verify ──────────────────────────────────────────────────────────

/// `GET /webhooks/whatsapp/{id}/verify` — the Meta hub challenge.
pub async fn whatsapp_verify(
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    let expected = env::var(WHATSAPP_VERIFY_TOKEN_ENV).unwrap_or_default();
    if mode == Some("subscribe") && !expected.is_empty() && token == Some(expected.as_str()) {
        (StatusCode::OK, challenge).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

// ─── Chatwoot ─────────────────────────────────────────────────────────────────

/// Constant-time HMAC-SHA256 check of a hex signature over the raw body.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    let Ok(given) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    computed.as_slice().ct_eq(given.as_slice()).into()
}

/// `POST /webhooks/chatwoot` with `x-chatwoot-api-signature`.
pub async fn chatwoot_webhook(
    State(runtime): State<Arc<NexusRuntime>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(secret) = env::var(CHATWOOT_SECRET_ENV) else {
        warn!("chatwoot webhook received but {CHATWOOT_SECRET_ENV} is not set");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let signature = headers
        .get("x-chatwoot-api-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(secret.as_bytes(), &body, signature) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return ok_ack(),
    };

    // Only inbound visitor messages start turns.
    if payload["message_type"].as_str() == Some("incoming")
        && let (Some(account), Some(conversation), Some(content)) = (
            payload["account"]["id"].as_i64(),
            payload["conversation"]["id"].as_i64(),
            payload["content"].as_str(),
        )
    {
        runtime.pipeline.dispatch(InboundMessage {
            project_id: account.to_string(),
            channel: "chatwoot".to_owned(),
            conversation_key: conversation.to_string(),
            text: content.to_owned(),
        });
    }
    ok_ack()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
