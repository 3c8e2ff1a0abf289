//! Retry decorator — exponential backoff around any provider.
//!
//! Transient failures (network, timeouts, 429/5xx, interrupted streams)
//! are retried with doubling delays. Cancellation cuts both the in-flight
//! request and the backoff sleep, and never consumes a retry attempt.
//! Non-transient failures (auth, protocol) surface immediately.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crank_core::error::ProviderError;
use crank_core::provider::*;

/// Backoff configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default 3).
    pub max_attempts: u32,

    /// Delay before the first retry; doubles each retry (default 1s).
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// A provider wrapping another provider with retry/backoff.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        let max = self.policy.max_attempts.max(1);

        for attempt in 1..=max {
            match self.inner.complete(request, hooks).await {
                Ok(response) => return Ok(response),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) if !e.is_transient() => {
                    warn!(provider = %self.inner.name(), error = %e,
                        "Non-transient provider error, not retrying");
                    return Err(e);
                }
                Err(e) if attempt == max => {
                    warn!(provider = %self.inner.name(), attempts = max, error = %e,
                        "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        provider = %self.inner.name(),
                        attempt,
                        max,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, backing off"
                    );
                    hooks.emit_retry(attempt, max, &e.to_string());

                    tokio::select! {
                        _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_core::message::Message;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Fails a configured number of times, then succeeds.
    struct FlakyProvider {
        failures: AtomicU32,
        error: ProviderError,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(failures: u32, error: ProviderError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: &ChatRequest,
            _hooks: &CompletionHooks,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(ChatResponse {
                model: "test-model".into(),
                choices: vec![Choice {
                    message: Message::assistant("success"),
                    finish_reason: FinishReason::Stop,
                }],
                usage: None,
            })
        }
    }

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "test".into(),
            messages: vec![Message::user("hello")],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    fn counting_hooks(retries: Arc<Mutex<Vec<(u32, u32, String)>>>) -> CompletionHooks {
        CompletionHooks {
            on_retry: Some(Arc::new(move |attempt, max, error: &str| {
                retries.lock().unwrap().push((attempt, max, error.to_string()));
            })),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds_with_two_notifications() {
        let inner = Arc::new(FlakyProvider::new(
            2,
            ProviderError::Network("conn reset".into()),
        ));
        let provider = RetryProvider::new(inner.clone());

        let retries = Arc::new(Mutex::new(Vec::new()));
        let hooks = counting_hooks(retries.clone());

        let result = provider.complete(&test_request(), &hooks).await.unwrap();
        assert_eq!(result.into_choice().unwrap().message.content, "success");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        let notifications = retries.lock().unwrap();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].0, 1);
        assert_eq!(notifications[1].0, 2);
        assert!(notifications[0].2.contains("conn reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_and_returns_last_error() {
        let inner = Arc::new(FlakyProvider::new(
            10,
            ProviderError::Timeout("slow".into()),
        ));
        let provider = RetryProvider::new(inner.clone());

        let result = provider
            .complete(&test_request(), &CompletionHooks::default())
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_error_not_retried() {
        let inner = Arc::new(FlakyProvider::new(
            10,
            ProviderError::AuthenticationFailed("bad key".into()),
        ));
        let provider = RetryProvider::new(inner.clone());

        let result = provider
            .complete(&test_request(), &CompletionHooks::default())
            .await;
        assert!(matches!(result, Err(ProviderError::AuthenticationFailed(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retries() {
        let inner = Arc::new(FlakyProvider::new(
            10,
            ProviderError::Network("down".into()),
        ));
        let provider = RetryProvider::new(inner.clone());

        let cancel = CancellationToken::new();
        let hooks = CompletionHooks::with_cancel(cancel.clone());

        let task = tokio::spawn(async move {
            provider.complete(&test_request(), &hooks).await
        });
        // Let the first attempt fail and the backoff sleep begin
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        // No retries after cancellation: only the initial attempt ran
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_inner_error_propagates_without_retry() {
        struct CancelledProvider {
            calls: AtomicU32,
        }

        #[async_trait]
        impl Provider for CancelledProvider {
            fn name(&self) -> &str {
                "cancelled"
            }
            async fn complete(
                &self,
                _request: &ChatRequest,
                _hooks: &CompletionHooks,
            ) -> std::result::Result<ChatResponse, ProviderError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Cancelled)
            }
        }

        let inner = Arc::new(CancelledProvider {
            calls: AtomicU32::new(0),
        });
        let provider = RetryProvider::new(inner.clone());
        let result = provider
            .complete(&test_request(), &CompletionHooks::default())
            .await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }
}
