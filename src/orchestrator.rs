//! Multi-tier fallback across synthesis backends.
//!
//! The orchestrator holds a flat table of [`BackendDescriptor`]s in priority
//! order and walks it in a single dispatch loop:
//!
//! ```text
//!   for each real backend, in order:
//!       cooling down?        ──► skip
//!       rate limiter denies? ──► skip (remember retry_after)
//!       call under timeout
//!           ok    ──► record_success, return
//!           error ──► record_failure, next
//!   silent terminal backend ──► empty audio
//! ```
//!
//! Every failure kind is handled the same way. The terminal backend bypasses
//! health and quota checks, so running out of backends produces an empty
//! outcome rather than an error.
//!
//! # Streaming
//!
//! [`FallbackOrchestrator::synthesize_streaming`] runs the same loop in a
//! spawned producer feeding a bounded channel (see
//! [`spawn_producer`](crate::backends::spawn_producer)). A backend that fails before
//! its first chunk is skipped like any other failure. Once chunks have been
//! delivered the voice is committed: a later failure ends the stream with
//! [`StreamEnd::complete`] set to `false` instead of splicing in audio from
//! the next backend. Dropping the stream closes the channel, which the
//! producer observes and answers by dropping the in-flight backend call.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::backends::{DEFAULT_STREAM_BUFFER, SilentBackend, SpeechBackend, spawn_producer};
use crate::health::HealthTracker;
use crate::limiter::{Admission, RateLimiter};
use crate::telemetry;
use crate::types::{SpeechEvent, StreamEnd, SynthesisOutcome, SynthesisRequest};
use crate::{Result, SkaldError};

/// Stream of orchestrator events; always ends with [`SpeechEvent::Finished`]
/// unless dropped early.
pub type SpeechEventStream = Pin<Box<dyn Stream<Item = SpeechEvent> + Send>>;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One row of the backend table.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub backend_id: String,
    pub supports_streaming: bool,
    /// Terminal backends sit at the end of the table and are never skipped.
    pub terminal: bool,
    pub backend: Arc<dyn SpeechBackend>,
}

impl BackendDescriptor {
    /// Describe a regular backend, taking id and capabilities from it.
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            backend_id: backend.name().to_string(),
            supports_streaming: backend.supports_streaming(),
            terminal: false,
            backend,
        }
    }

    /// Describe a terminal backend.
    pub fn terminal(backend: Arc<dyn SpeechBackend>) -> Self {
        Self {
            terminal: true,
            ..Self::new(backend)
        }
    }

    /// The built-in silent terminal.
    pub fn silent() -> Self {
        Self::terminal(Arc::new(SilentBackend))
    }
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("backend_id", &self.backend_id)
            .field("supports_streaming", &self.supports_streaming)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Bound on each backend call, and on each chunk wait when streaming.
    pub timeout: Duration,
    /// Chunks buffered between the producer task and the consumer.
    pub stream_buffer: usize,
    /// Longest quota `retry_after` worth waiting for before settling for the
    /// terminal backend. Zero disables waiting.
    pub max_quota_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            max_quota_wait: Duration::ZERO,
        }
    }
}

/// Reachability of one backend, from [`FallbackOrchestrator::probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProbe {
    pub backend_id: String,
    pub reachable: bool,
}

enum Gate {
    Admitted,
    CoolingDown,
    Quota(Option<Duration>),
}

enum StreamAttempt {
    Completed,
    /// Nothing reached the consumer; the next backend may take over.
    FailedBeforeAudio(SkaldError),
    FailedMidStream(SkaldError),
    /// Consumer dropped the stream.
    Closed,
}

/// Walks the backend table for each request.
///
/// Cheap to clone; clones share the table, health tracker and limiter.
#[derive(Clone)]
pub struct FallbackOrchestrator {
    backends: Arc<[BackendDescriptor]>,
    health: Arc<HealthTracker>,
    limiter: Arc<RateLimiter>,
    config: OrchestratorConfig,
}

impl FallbackOrchestrator {
    /// Build an orchestrator over `backends` in priority order.
    ///
    /// A silent terminal backend is appended when the table does not already
    /// end with a terminal entry. An empty table, or a terminal entry
    /// anywhere but last, is a configuration error.
    pub fn new(
        mut backends: Vec<BackendDescriptor>,
        health: Arc<HealthTracker>,
        limiter: Arc<RateLimiter>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        if backends.is_empty() {
            return Err(SkaldError::Configuration(
                "backend table is empty".to_string(),
            ));
        }
        if let Some(pos) = backends.iter().position(|d| d.terminal)
            && pos + 1 != backends.len()
        {
            return Err(SkaldError::Configuration(format!(
                "terminal backend '{}' must be last",
                backends[pos].backend_id
            )));
        }
        if !backends.last().is_some_and(|d| d.terminal) {
            backends.push(BackendDescriptor::silent());
        }

        Ok(Self {
            backends: backends.into(),
            health,
            limiter,
            config,
        })
    }

    /// Backend ids in priority order, terminal last.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|d| d.backend_id.clone()).collect()
    }

    /// The table, terminal last.
    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    /// Highest-priority real backend.
    pub fn primary(&self) -> Option<&BackendDescriptor> {
        self.backends.iter().find(|d| !d.terminal)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Synthesize the whole request with fallback.
    #[instrument(skip(self, request), fields(voice = %request.voice_id(), chars = request.char_count()))]
    pub async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisOutcome {
        let mut waited = false;
        loop {
            let mut shortest_wait = None;
            for descriptor in self.real_backends() {
                match self.gate(descriptor, request) {
                    Gate::Admitted => {}
                    Gate::CoolingDown => continue,
                    Gate::Quota(wait) => {
                        shortest_wait = min_wait(shortest_wait, wait);
                        continue;
                    }
                }

                let start = Instant::now();
                let result = self.call(descriptor, request).await;
                record_request(&descriptor.backend_id, "synthesize", start, result.is_ok());
                match result {
                    Ok(audio) => {
                        self.health.record_success(&descriptor.backend_id);
                        return SynthesisOutcome {
                            audio,
                            backend: descriptor.backend_id.clone(),
                            terminal: false,
                        };
                    }
                    Err(e) => self.record_failure(descriptor, &e),
                }
            }

            if !waited && self.wait_for_quota(shortest_wait).await {
                waited = true;
                continue;
            }
            break;
        }

        self.terminal_outcome(request).await
    }

    /// Synthesize as a stream of [`SpeechEvent`]s with fallback.
    ///
    /// Must be called within a tokio runtime.
    #[instrument(skip(self, request), fields(voice = %request.voice_id(), chars = request.char_count()))]
    pub fn synthesize_streaming(&self, request: &SynthesisRequest) -> SpeechEventStream {
        let this = self.clone();
        let request = request.clone();
        spawn_producer(self.config.stream_buffer, move |tx| async move {
            this.produce(&request, &tx).await;
        })
    }

    /// Check reachability of every backend concurrently.
    ///
    /// Out of band only: the result never changes health or ordering.
    pub async fn probe(&self) -> Vec<BackendProbe> {
        let checks = self.backends.iter().map(|d| async move {
            BackendProbe {
                backend_id: d.backend_id.clone(),
                reachable: d.backend.is_reachable().await,
            }
        });
        futures_util::future::join_all(checks).await
    }

    async fn produce(&self, request: &SynthesisRequest, tx: &mpsc::Sender<SpeechEvent>) {
        let mut waited = false;
        loop {
            let mut shortest_wait = None;
            for descriptor in self.real_backends() {
                match self.gate(descriptor, request) {
                    Gate::Admitted => {}
                    Gate::CoolingDown => continue,
                    Gate::Quota(wait) => {
                        shortest_wait = min_wait(shortest_wait, wait);
                        continue;
                    }
                }

                let start = Instant::now();
                let attempt = self.stream_from(descriptor, request, tx).await;
                let ok = matches!(attempt, StreamAttempt::Completed);
                record_request(&descriptor.backend_id, "synthesize_stream", start, ok);

                match attempt {
                    StreamAttempt::Completed => {
                        self.health.record_success(&descriptor.backend_id);
                        let _ = tx
                            .send(SpeechEvent::Finished(StreamEnd {
                                backend: descriptor.backend_id.clone(),
                                complete: true,
                                terminal: false,
                            }))
                            .await;
                        return;
                    }
                    StreamAttempt::FailedBeforeAudio(e) => self.record_failure(descriptor, &e),
                    StreamAttempt::FailedMidStream(e) => {
                        self.health.record_failure(&descriptor.backend_id);
                        warn!(
                            backend = %descriptor.backend_id,
                            kind = %e.kind(),
                            error = %e,
                            "backend failed mid-stream, ending incomplete"
                        );
                        let _ = tx
                            .send(SpeechEvent::Finished(StreamEnd {
                                backend: descriptor.backend_id.clone(),
                                complete: false,
                                terminal: false,
                            }))
                            .await;
                        return;
                    }
                    StreamAttempt::Closed => return,
                }
            }

            if !waited && self.wait_for_quota(shortest_wait).await {
                waited = true;
                continue;
            }
            break;
        }

        let outcome = self.terminal_outcome(request).await;
        if !outcome.audio.is_empty() && tx.send(SpeechEvent::Audio(outcome.audio)).await.is_err() {
            return;
        }
        let _ = tx
            .send(SpeechEvent::Finished(StreamEnd {
                backend: outcome.backend,
                complete: true,
                terminal: true,
            }))
            .await;
    }

    async fn stream_from(
        &self,
        descriptor: &BackendDescriptor,
        request: &SynthesisRequest,
        tx: &mpsc::Sender<SpeechEvent>,
    ) -> StreamAttempt {
        if !descriptor.supports_streaming {
            return match self.call(descriptor, request).await {
                Ok(audio) => match tx.send(SpeechEvent::Audio(audio)).await {
                    Ok(()) => StreamAttempt::Completed,
                    Err(_) => StreamAttempt::Closed,
                },
                Err(e) => StreamAttempt::FailedBeforeAudio(e),
            };
        }

        let timeout = self.config.timeout;
        let mut stream =
            match tokio::time::timeout(timeout, descriptor.backend.synthesize_stream(request)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return StreamAttempt::FailedBeforeAudio(e),
                Err(_) => return StreamAttempt::FailedBeforeAudio(SkaldError::Timeout(timeout)),
            };

        let mut delivered = false;
        loop {
            let next = match tokio::time::timeout(timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(SkaldError::Timeout(timeout))),
            };
            match next {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    delivered = true;
                    if tx.send(SpeechEvent::Audio(chunk)).await.is_err() {
                        return StreamAttempt::Closed;
                    }
                }
                Some(Err(e)) if delivered => return StreamAttempt::FailedMidStream(e),
                Some(Err(e)) => return StreamAttempt::FailedBeforeAudio(e),
                None if delivered => return StreamAttempt::Completed,
                None => return StreamAttempt::FailedBeforeAudio(SkaldError::EmptyAudio),
            }
        }
    }

    fn real_backends(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backends.iter().filter(|d| !d.terminal)
    }

    fn gate(&self, descriptor: &BackendDescriptor, request: &SynthesisRequest) -> Gate {
        let id = descriptor.backend_id.as_str();
        if !self.health.is_eligible(id) {
            debug!(backend = id, "skipping backend in cooldown");
            record_fallback(id, "cooldown");
            return Gate::CoolingDown;
        }
        match self.limiter.try_acquire(id, request.char_count()) {
            Admission::Allowed => Gate::Admitted,
            Admission::Denied { retry_after } => {
                debug!(backend = id, ?retry_after, "skipping backend over quota");
                record_fallback(id, "quota");
                Gate::Quota(retry_after)
            }
        }
    }

    /// One non-streaming call under the timeout. Empty audio is a failure.
    async fn call(&self, descriptor: &BackendDescriptor, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let timeout = self.config.timeout;
        let audio = tokio::time::timeout(timeout, descriptor.backend.synthesize(request))
            .await
            .map_err(|_| SkaldError::Timeout(timeout))??;
        if audio.is_empty() {
            return Err(SkaldError::EmptyAudio);
        }
        Ok(audio)
    }

    fn record_failure(&self, descriptor: &BackendDescriptor, error: &SkaldError) {
        let kind = error.kind();
        warn!(
            backend = %descriptor.backend_id,
            kind = %kind,
            error = %error,
            "backend failed, falling back"
        );
        self.health.record_failure(&descriptor.backend_id);
        record_fallback(&descriptor.backend_id, kind.as_str());
    }

    /// Sleep for the shortest quota wait if it is within `max_quota_wait`.
    async fn wait_for_quota(&self, shortest_wait: Option<Duration>) -> bool {
        match shortest_wait {
            Some(wait) if !self.config.max_quota_wait.is_zero() && wait <= self.config.max_quota_wait => {
                debug!(wait_ms = wait.as_millis() as u64, "waiting for quota before last resort");
                tokio::time::sleep(wait).await;
                true
            }
            _ => false,
        }
    }

    async fn terminal_outcome(&self, request: &SynthesisRequest) -> SynthesisOutcome {
        // The constructor guarantees a terminal entry at the end.
        let Some(terminal) = self.backends.last() else {
            return SynthesisOutcome {
                audio: Vec::new(),
                backend: String::new(),
                terminal: true,
            };
        };
        warn!(backend = %terminal.backend_id, "all backends unavailable, using terminal backend");

        let timeout = self.config.timeout;
        let audio = match tokio::time::timeout(timeout, terminal.backend.synthesize(request)).await {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => {
                warn!(backend = %terminal.backend_id, error = %e, "terminal backend failed");
                Vec::new()
            }
            Err(_) => Vec::new(),
        };
        SynthesisOutcome {
            audio,
            backend: terminal.backend_id.clone(),
            terminal: true,
        }
    }
}

fn min_wait(current: Option<Duration>, candidate: Option<Duration>) -> Option<Duration> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn record_request(backend: &str, operation: &'static str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "backend" => backend.to_owned(),
        "operation" => operation,
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "backend" => backend.to_owned(),
        "operation" => operation,
    )
    .record(start.elapsed().as_secs_f64());
}

fn record_fallback(backend: &str, reason: &'static str) {
    metrics::counter!(telemetry::FALLBACKS_TOTAL,
        "backend" => backend.to_owned(),
        "reason" => reason,
    )
    .increment(1);
}
