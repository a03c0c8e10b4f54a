//! Retry configuration, delay calculation, and the retrying backend
//! decorator.
//!
//! [`RetryingBackend`] retries transient errors on the *same* backend before
//! the orchestrator sees a failure. Each exhausted retry sequence counts as
//! one failure towards the health threshold, so a flaky provider is retried
//! in place while a dead one is demoted quickly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::SpeechBackend;
use crate::telemetry;
use crate::types::{AudioStream, QuotaUsage, SynthesisRequest};
use crate::{Result, SkaldError};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff capped at `max_delay`:
///
/// ```rust
/// # use skald::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(3)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 2.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 250ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 5s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay for a given attempt number (0-indexed):
    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Delay respecting a provider `retry_after` hint, still capped at
    /// `max_delay` so one backend cannot stall the fallback chain.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by [`SkaldError::is_transient()`])
/// up to `config.max_attempts`. Permanent errors are returned immediately.
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    backend: &str,
    operation: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt, e.retry_after());
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "backend" => backend.to_owned(),
                        "operation" => operation.to_owned(),
                    )
                    .increment(1);
                    warn!(
                        backend,
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(SkaldError::NoBackend))
}

/// Decorator that wraps a [`SpeechBackend`] with retry logic.
///
/// Streams retry only the initial connection, not mid-stream failures.
pub struct RetryingBackend {
    inner: Arc<dyn SpeechBackend>,
    config: RetryConfig,
}

impl RetryingBackend {
    /// Wrap a backend with retry logic.
    pub fn new(inner: Arc<dyn SpeechBackend>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl SpeechBackend for RetryingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        with_retry(&self.config, self.inner.name(), "synthesize", || {
            self.inner.synthesize(request)
        })
        .await
    }

    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream> {
        with_retry(&self.config, self.inner.name(), "synthesize_stream", || {
            self.inner.synthesize_stream(request)
        })
        .await
    }

    async fn is_reachable(&self) -> bool {
        self.inner.is_reachable().await
    }

    async fn usage(&self) -> Result<QuotaUsage> {
        self.inner.usage().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_wins_but_is_capped() {
        let config = RetryConfig::new().max_delay(Duration::from_secs(5));
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn disabled_is_single_attempt() {
        assert_eq!(RetryConfig::disabled().max_attempts, 1);
    }
}
