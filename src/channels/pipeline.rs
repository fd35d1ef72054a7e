//! Inbound message pipeline.
//!
//! Channel adapters (external) parse platform payloads into
//! [`InboundMessage`]s and hand them here. For each message the pipeline
//! resolves the active session for `(project, channel, conversation)`,
//! executes the agent turn, and hands the assistant text back to the
//! delivery side.
//!
//! Processing is strictly serial per conversation: each conversation gets
//! one worker with a FIFO queue so replies keep their order. Different
//! conversations run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::agent::runner::TurnOutcome;
use crate::agent::signal::AbortSignal;
use crate::database::Database;
use crate::error::NexusResult;

// ─── Collaborator traits ──────────────────────────────────────────────────────

/// Executes one agent turn against a resolved session. Implemented by the
/// runtime's turn engine.
#[async_trait]
pub trait TurnService: Send + Sync {
    async fn execute_turn(
        &self,
        project_id: &str,
        session_id: &str,
        message: &str,
        abort: AbortSignal,
    ) -> NexusResult<TurnOutcome>;
}

/// Hands assistant text back to the channel adapter for delivery.
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn deliver(
        &self,
        channel: &str,
        conversation_key: &str,
        text: &str,
    ) -> NexusResult<()>;
}

/// Delivery sink that only logs; used when no adapter is attached.
pub struct LogDelivery;

#[async_trait]
impl OutboundDelivery for LogDelivery {
    async fn deliver(
        &self,
        channel: &str,
        conversation_key: &str,
        text: &str,
    ) -> NexusResult<()> {
        info!("outbound [{channel}/{conversation_key}]: {} chars", text.len());
        Ok(())
    }
}

// ─── InboundMessage ───────────────────────────────────────────────────────────

/// One message from a channel, already parsed by the adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub project_id: String,
    pub channel: String,
    /// Conversation identifier within the channel (chat id, thread id...).
    pub conversation_key: String,
    pub text: String,
}

// ─── InboundPipeline ──────────────────────────────────────────────────────────

pub struct InboundPipeline {
    db: Arc<Database>,
    service: Arc<dyn TurnService>,
    delivery: Arc<dyn OutboundDelivery>,
    turn_timeout: Duration,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<InboundMessage>>>,
}

impl InboundPipeline {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn TurnService>,
        delivery: Arc<dyn OutboundDelivery>,
        turn_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            service,
            delivery,
            turn_timeout,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue a message behind any in-flight work for its conversation.
    /// Returns immediately; processing happens on the conversation worker.
    pub fn dispatch(self: &Arc<Self>, message: InboundMessage) {
        let key = format!(
            "{}:{}:{}",
            message.project_id, message.channel, message.conversation_key
        );

        let mut workers = match self.workers.lock() {
            Ok(workers) => workers,
            Err(_) => return,
        };
        if let Some(tx) = workers.get(&key)
            && tx.send(message.clone()).is_ok()
        {
            return;
        }

        // First message for this conversation (or its worker died): start a
        // fresh worker that drains the queue in FIFO order.
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let _ = tx.send(message);
        workers.insert(key, tx);
        drop(workers);

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                pipeline.process(message).await;
            }
        });
    }

    /// Handle one message end to end. Errors are logged, never propagated:
    /// the worker must keep serving the conversation.
    async fn process(&self, message: InboundMessage) {
        let session = match self.db.resolve_or_create_session(
            &message.project_id,
            &message.channel,
            &message.conversation_key,
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "inbound: failed to resolve session for {}/{}: {e}",
                    message.channel, message.conversation_key
                );
                return;
            }
        };

        let abort = AbortSignal::timeout(self.turn_timeout);
        let outcome = match self
            .service
            .execute_turn(&message.project_id, &session.id, &message.text, abort)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("inbound: turn failed for session {}: {e}", session.id);
                return;
            }
        };

        if outcome.assistant_text.is_empty() {
            return;
        }
        if let Err(e) = self
            .delivery
            .deliver(
                &message.channel,
                &message.conversation_key,
                &outcome.assistant_text,
            )
            .await
        {
            warn!("inbound: delivery failed for session {}: {e}", session.id);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
