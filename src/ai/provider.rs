//! The [`ChatProvider`] trait and provider error type.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::config::FailoverConfig;

use super::registry;
use super::types::{ChatMessage, ChatRequest, StreamEvent};

// ─── ProviderError ────────────────────────────────────────────────────────────

/// Failure of a provider call or stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("malformed provider payload: {message}")]
    Parse { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ProviderError {
    pub fn transport(e: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }

    pub fn parse(e: impl std::fmt::Display) -> Self {
        Self::Parse {
            message: e.to_string(),
        }
    }

    /// Whether the failover policy permits retrying after this error.
    ///
    /// Business errors (parse failures, invalid requests, auth) are never
    /// retried; transport/5xx/rate-limit/timeout errors follow the policy
    /// switches.
    pub fn is_retriable(&self, failover: &FailoverConfig) -> bool {
        match self {
            Self::Timeout => failover.on_timeout,
            Self::RateLimited { .. } => failover.on_rate_limit,
            Self::Server { .. } | Self::Transport { .. } => failover.on_server_error,
            Self::Auth { .. } | Self::Parse { .. } | Self::InvalidRequest { .. } => false,
        }
    }
}

// ─── ChatProvider ─────────────────────────────────────────────────────────────

/// Stream of provider events; the runner consumes it linearly.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// A streaming chat model behind a uniform interface.
///
/// Implementations translate the canonical request into their vendor wire
/// format and the vendor's stream back into [`StreamEvent`]s. Usage must be
/// reported on `MessageEnd`; when the vendor omits output-token counts the
/// implementation estimates `ceil(chars / 4)`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider family name, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Bound model identifier.
    fn model(&self) -> &str;

    /// Start one streaming completion.
    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError>;

    /// Approximate token count for the given messages (4 chars per token).
    fn count_tokens(&self, messages: &[ChatMessage]) -> u32 {
        let chars: usize = messages.iter().map(ChatMessage::char_len).sum();
        estimate_tokens(chars)
    }

    /// Context window of the bound model.
    fn context_window(&self) -> u32 {
        registry::model_info(self.model()).context_window
    }

    /// Whether the bound model supports tool use.
    fn supports_tools(&self) -> bool {
        registry::model_info(self.model()).supports_tools
    }
}

/// `ceil(chars / 4)` token approximation used across the runtime.
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
