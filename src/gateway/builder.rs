//! Builder for configuring synthesizer instances

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::{CACHE_SOURCE, SpeechSynthesizer};
use crate::backends::{
    CommandBackend, DEFAULT_STREAM_BUFFER, RetryConfig, RetryingBackend, SILENT_BACKEND,
    SpeechBackend,
};
use crate::cache::{AudioCache, CacheConfig};
use crate::health::{HealthConfig, HealthTracker};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::orchestrator::{
    BackendDescriptor, DEFAULT_TIMEOUT, FallbackOrchestrator, OrchestratorConfig,
};
use crate::{Result, SkaldError};

/// Main entry point for creating synthesizer instances.
pub struct Skald;

impl Skald {
    /// Create a new builder for configuring the synthesizer.
    pub fn builder() -> SkaldBuilder {
        SkaldBuilder::new()
    }
}

/// Builder for configuring synthesizer instances.
///
/// Backends are tried in the order they were added, with ElevenLabs (when
/// configured) always first and the silent terminal always last.
pub struct SkaldBuilder {
    #[cfg(feature = "elevenlabs")]
    elevenlabs_key: Option<String>,
    #[cfg(feature = "elevenlabs")]
    elevenlabs_model: Option<String>,
    #[cfg(feature = "elevenlabs")]
    elevenlabs_base_url: Option<String>,
    backends: Vec<Arc<dyn SpeechBackend>>,
    rate_limits: Vec<(String, RateLimitConfig)>,
    cache: CacheConfig,
    health: HealthConfig,
    retry: Option<RetryConfig>,
    timeout: Duration,
    stream_buffer_size: usize,
    max_quota_wait: Duration,
}

impl SkaldBuilder {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "elevenlabs")]
            elevenlabs_key: None,
            #[cfg(feature = "elevenlabs")]
            elevenlabs_model: None,
            #[cfg(feature = "elevenlabs")]
            elevenlabs_base_url: None,
            backends: Vec::new(),
            rate_limits: Vec::new(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            retry: None,
            timeout: DEFAULT_TIMEOUT,
            stream_buffer_size: DEFAULT_STREAM_BUFFER,
            max_quota_wait: Duration::ZERO,
        }
    }

    /// Configure ElevenLabs as the primary backend.
    #[cfg(feature = "elevenlabs")]
    pub fn elevenlabs(mut self, api_key: impl Into<String>) -> Self {
        self.elevenlabs_key = Some(api_key.into());
        self
    }

    /// ElevenLabs synthesis model (default: `eleven_multilingual_v2`).
    #[cfg(feature = "elevenlabs")]
    pub fn elevenlabs_model(mut self, model_id: impl Into<String>) -> Self {
        self.elevenlabs_model = Some(model_id.into());
        self
    }

    /// Point the ElevenLabs client at another host (proxies, tests).
    #[cfg(feature = "elevenlabs")]
    pub fn elevenlabs_base_url(mut self, url: impl Into<String>) -> Self {
        self.elevenlabs_base_url = Some(url.into());
        self
    }

    /// Add a backend after those already configured.
    pub fn backend(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Add a local engine run as a subprocess.
    ///
    /// ```rust
    /// # use skald::Skald;
    /// let builder = Skald::builder()
    ///     .local_command("espeak", "espeak-ng", ["--stdout", "-v", "{voice}", "{text}"]);
    /// ```
    pub fn local_command<I, S>(
        self,
        name: impl Into<String>,
        program: impl Into<String>,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backend(Arc::new(CommandBackend::new(name, program).args(args)))
    }

    /// Apply a sliding-window quota to one backend.
    pub fn rate_limit(mut self, backend_id: impl Into<String>, config: RateLimitConfig) -> Self {
        self.rate_limits.push((backend_id.into(), config));
        self
    }

    /// Set the audio cache budget and TTL.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the failure threshold and cooldown.
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    /// Retry transient errors on the same backend before falling back.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Bound on each backend call (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the stream buffer size for backpressure.
    ///
    /// Controls the bounded channel capacity between the backend and the
    /// consumer. Default: [`DEFAULT_STREAM_BUFFER`] (64).
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Wait up to this long for a quota window to reopen before settling
    /// for silence (default: don't wait).
    pub fn max_quota_wait(mut self, wait: Duration) -> Self {
        self.max_quota_wait = wait;
        self
    }

    /// Real backends in priority order.
    fn collect_backends(&mut self) -> Vec<Arc<dyn SpeechBackend>> {
        let mut backends: Vec<Arc<dyn SpeechBackend>> = Vec::new();

        #[cfg(feature = "elevenlabs")]
        if let Some(key) = self.elevenlabs_key.take() {
            let mut client = match self.elevenlabs_base_url.take() {
                Some(url) => crate::backends::ElevenLabsClient::with_base_url(key, url),
                None => crate::backends::ElevenLabsClient::new(key),
            };
            if let Some(model) = self.elevenlabs_model.take() {
                client = client.model(model);
            }
            backends.push(Arc::new(client));
        }

        backends.append(&mut self.backends);
        backends
    }

    /// Build the synthesizer.
    ///
    /// Fails with [`SkaldError::NoBackend`] when no real backend was added,
    /// and with a configuration error for duplicate ids, the reserved ids
    /// `silent` and `cache`, or a rate limit naming an unknown backend.
    pub fn build(mut self) -> Result<SpeechSynthesizer> {
        let backends = self.collect_backends();
        if backends.is_empty() {
            return Err(SkaldError::NoBackend);
        }

        let mut seen = HashSet::new();
        for backend in &backends {
            if matches!(backend.name(), SILENT_BACKEND | CACHE_SOURCE) {
                return Err(SkaldError::Configuration(format!(
                    "backend id '{}' is reserved",
                    backend.name()
                )));
            }
            if !seen.insert(backend.name().to_string()) {
                return Err(SkaldError::Configuration(format!(
                    "duplicate backend id '{}'",
                    backend.name()
                )));
            }
        }

        let limiter = RateLimiter::new();
        for (backend_id, config) in self.rate_limits {
            if !seen.contains(&backend_id) {
                return Err(SkaldError::Configuration(format!(
                    "rate limit for unknown backend '{backend_id}'"
                )));
            }
            limiter.set_limit(backend_id, config);
        }

        let descriptors = backends
            .into_iter()
            .map(|backend| match &self.retry {
                Some(retry) => {
                    let wrapped: Arc<dyn SpeechBackend> =
                        Arc::new(RetryingBackend::new(backend, retry.clone()));
                    BackendDescriptor::new(wrapped)
                }
                None => BackendDescriptor::new(backend),
            })
            .collect();

        let orchestrator = FallbackOrchestrator::new(
            descriptors,
            Arc::new(HealthTracker::new(self.health)),
            Arc::new(limiter),
            OrchestratorConfig {
                timeout: self.timeout,
                stream_buffer: self.stream_buffer_size,
                max_quota_wait: self.max_quota_wait,
            },
        )?;

        Ok(SpeechSynthesizer::new(
            orchestrator,
            Arc::new(AudioCache::new(&self.cache)),
        ))
    }
}

impl Default for SkaldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SilentBackend;

    #[test]
    fn no_backend_is_an_error() {
        assert!(matches!(Skald::builder().build(), Err(SkaldError::NoBackend)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = Skald::builder()
            .local_command("espeak", "espeak-ng", ["{text}"])
            .local_command("espeak", "espeak", ["{text}"])
            .build();
        assert!(matches!(result, Err(SkaldError::Configuration(_))));
    }

    #[test]
    fn reserved_ids_are_rejected() {
        let result = Skald::builder()
            .local_command("espeak", "espeak-ng", ["{text}"])
            .backend(Arc::new(SilentBackend))
            .build();
        assert!(matches!(result, Err(SkaldError::Configuration(_))));

        let result = Skald::builder()
            .local_command("cache", "espeak-ng", ["{text}"])
            .build();
        assert!(matches!(result, Err(SkaldError::Configuration(_))));
    }

    #[test]
    fn rate_limit_for_unknown_backend_is_rejected() {
        let result = Skald::builder()
            .local_command("espeak", "espeak-ng", ["{text}"])
            .rate_limit("nope", RateLimitConfig::new())
            .build();
        assert!(matches!(result, Err(SkaldError::Configuration(_))));
    }

    #[cfg(feature = "elevenlabs")]
    #[test]
    fn elevenlabs_is_always_first() {
        let synth = Skald::builder()
            .local_command("espeak", "espeak-ng", ["{text}"])
            .elevenlabs("key")
            .build()
            .unwrap();
        assert_eq!(
            synth.orchestrator().backend_ids(),
            vec!["elevenlabs", "espeak", "silent"]
        );
    }
}
