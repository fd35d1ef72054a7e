//! Failover wrapper around any [`ChatProvider`].
//!
//! Applies the project's [`FailoverConfig`]: a per-call timeout, retry with
//! exponential backoff (base 500 ms, factor 2, jitter ±25 %) on the error
//! classes the policy enables. Retries cover the connection and the wait for
//! the first stream event only; a stream that has yielded anything is never
//! retried, so partial progress keeps its ordering and is paid for once.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use crate::ai::provider::{ChatProvider, EventStream, ProviderError};
use crate::ai::types::{ChatMessage, ChatRequest};
use crate::config::FailoverConfig;

const BACKOFF_BASE_MS: u64 = 500;

pub struct ReliableProvider {
    inner: Arc<dyn ChatProvider>,
    failover: FailoverConfig,
}

impl ReliableProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, failover: FailoverConfig) -> Self {
        Self { inner, failover }
    }
}

#[async_trait]
impl ChatProvider for ReliableProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn count_tokens(&self, messages: &[ChatMessage]) -> u32 {
        self.inner.count_tokens(messages)
    }

    fn context_window(&self) -> u32 {
        self.inner.context_window()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn chat(&self, request: ChatRequest) -> Result<EventStream, ProviderError> {
        let deadline = Duration::from_millis(self.failover.timeout_ms);
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let err = match tokio::time::timeout(deadline, self.inner.chat(request.clone())).await
            {
                Err(_) => ProviderError::Timeout,
                Ok(Err(e)) => e,
                Ok(Ok(mut stream)) => {
                    // Wait for the first event under the same deadline. Once
                    // anything has been yielded the stream is committed and
                    // handed through untouched.
                    match tokio::time::timeout(deadline, stream.next()).await {
                        Err(_) => ProviderError::Timeout,
                        Ok(None) => ProviderError::transport("stream closed before any event"),
                        Ok(Some(Err(e))) => e,
                        Ok(Some(Ok(first))) => {
                            let replay = futures::stream::iter(vec![Ok(first)]);
                            return Ok(Box::pin(replay.chain(stream)));
                        }
                    }
                }
            };

            if attempt < self.failover.max_retries && err.is_retriable(&self.failover) {
                attempt += 1;
                warn!(
                    provider = self.inner.name(),
                    attempt,
                    error = %err,
                    "provider call failed, retrying"
                );
                continue;
            }
            return Err(err);
        }
    }
}

/// Exponential backoff with ±25 % jitter derived from the clock's subsecond
/// nanos (no RNG dependency needed for spread this coarse).
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << exponent);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    // Map nanos to a factor in [-250, 250) thousandths, i.e. ±25 %.
    let jitter_thousandths = (nanos % 500) as i64 - 250;
    let jittered = base as i64 + (base as i64 * jitter_thousandths) / 1000;
    Duration::from_millis(jittered.max(1) as u64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::providers::mock::MockProvider;
    use crate::ai::types::{StopReason, StreamEvent};
    use std::sync::atomic::Ordering;

    fn fast_failover(max_retries: u32) -> FailoverConfig {
        FailoverConfig {
            max_retries,
            timeout_ms: 5_000,
            ..FailoverConfig::default()
        }
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        let d1 = backoff_delay(1).as_millis() as i64;
        let d2 = backoff_delay(2).as_millis() as i64;
        let d3 = backoff_delay(3).as_millis() as i64;
        assert!((375..=625).contains(&d1), "attempt 1: {d1}");
        assert!((750..=1250).contains(&d2), "attempt 2: {d2}");
        assert!((1500..=2500).contains(&d3), "attempt 3: {d3}");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_error_then_succeeds() {
        let mock = MockProvider::new("mock-model")
            .fail_once(ProviderError::transport("connection reset"))
            .then_text("Hello.", 10, 5);
        let calls = mock.call_count();
        let reliable = ReliableProvider::new(Arc::new(mock), fast_failover(2));

        let mut stream = reliable
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")], ""))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            if let StreamEvent::ContentDelta { text: t } = item.unwrap() {
                text += &t;
            }
        }
        assert_eq!(text, "Hello.");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_error_propagates_immediately() {
        let mock = MockProvider::new("mock-model")
            .fail_once(ProviderError::Auth {
                message: "bad key".to_owned(),
            })
            .then_text("never reached", 1, 1);
        let calls = mock.call_count();
        let reliable = ReliableProvider::new(Arc::new(mock), fast_failover(3));

        let err = match reliable
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")], ""))
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ProviderError::Auth { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_and_surface_last_error() {
        let mock = MockProvider::new("mock-model")
            .fail_once(ProviderError::transport("a"))
            .fail_once(ProviderError::transport("b"))
            .fail_once(ProviderError::transport("c"));
        let calls = mock.call_count();
        let reliable = ReliableProvider::new(Arc::new(mock), fast_failover(2));

        let err = match reliable
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")], ""))
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ProviderError::Transport { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_stream_passes_through() {
        let mock = MockProvider::new("mock-model").then_tool_call(
            "c1",
            "calculator",
            serde_json::json!({"expression": "1+1"}),
            10,
            5,
        );
        let reliable = ReliableProvider::new(Arc::new(mock), fast_failover(0));

        let mut stream = reliable
            .chat(ChatRequest::new(vec![ChatMessage::user("go")], ""))
            .await
            .unwrap();

        let mut saw_tool_end = false;
        let mut saw_message_end = false;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                StreamEvent::ToolUseEnd { name, .. } => {
                    assert_eq!(name, "calculator");
                    saw_tool_end = true;
                }
                StreamEvent::MessageEnd { stop_reason, .. } => {
                    assert_eq!(stop_reason, StopReason::ToolUse);
                    saw_message_end = true;
                }
                _ => {}
            }
        }
        assert!(saw_tool_end && saw_message_end);
    }
}
