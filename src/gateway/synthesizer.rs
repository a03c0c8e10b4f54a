//! SpeechSynthesizer - cache in front of the fallback orchestrator

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, future, stream};
use pin_project_lite::pin_project;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backends::SILENT_BACKEND;
use crate::cache::{AudioCache, CacheStats, Fingerprint};
use crate::health::BackendHealth;
use crate::limiter::Remaining;
use crate::orchestrator::{BackendProbe, FallbackOrchestrator, SpeechEventStream};
use crate::types::{
    AudioStream, QuotaUsage, SpeechEvent, StreamEnd, SynthesisOutcome, SynthesisRequest,
    SynthesisSettings,
};
use crate::{Result, SkaldError, SpeechGateway};

/// Text-to-speech entry point: audio cache, then fallback across backends.
///
/// Built with [`Skald::builder()`](crate::Skald::builder). Successful
/// non-empty results are written back to the cache; silent fallbacks and
/// interrupted streams never are.
pub struct SpeechSynthesizer {
    cache: Arc<AudioCache>,
    orchestrator: FallbackOrchestrator,
}

impl SpeechSynthesizer {
    pub fn new(orchestrator: FallbackOrchestrator, cache: Arc<AudioCache>) -> Self {
        Self {
            cache,
            orchestrator,
        }
    }

    /// Synthesize `text`, returning encoded audio.
    ///
    /// Returns an empty buffer when every backend is unavailable.
    pub async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<Vec<u8>> {
        let request = SynthesisRequest::new(text, voice_id, *settings);
        Ok(self.synthesize(&request).await.audio)
    }

    /// Synthesize a prepared request, reporting which backend answered.
    ///
    /// A cache hit reports the backend id [`CACHE_SOURCE`]; empty text is
    /// answered by the silent backend without dispatching anything.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisOutcome {
        if request.is_empty() {
            debug!("nothing to synthesize");
            return SynthesisOutcome {
                audio: Vec::new(),
                backend: SILENT_BACKEND.to_string(),
                terminal: true,
            };
        }

        let key = Fingerprint::of(request);
        if let Some(audio) = self.cache.try_get(&key) {
            debug!(fingerprint = ?key, "serving audio from cache");
            return SynthesisOutcome {
                audio: audio.to_vec(),
                backend: CACHE_SOURCE.to_string(),
                terminal: false,
            };
        }

        let outcome = self.orchestrator.synthesize(request).await;
        if outcome.is_cacheable() {
            self.cache.put(key, outcome.audio.as_slice());
        }
        outcome
    }

    /// Synthesize `text` as a stream of audio chunks.
    ///
    /// A cached result is replayed as a single chunk. Otherwise chunks are
    /// forwarded as the backend produces them and committed to the cache
    /// only if the backend finishes its output. Every item is `Ok`: a
    /// backend that stops partway simply ends the stream early, and running
    /// out of backends yields no chunks at all. Use
    /// [`stream_events`](Self::stream_events) to tell those endings apart.
    pub async fn stream_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<AudioStream> {
        let request = SynthesisRequest::new(text, voice_id, *settings);
        Ok(self.stream_request(&request))
    }

    /// Stream a prepared request as audio chunks.
    pub fn stream_request(&self, request: &SynthesisRequest) -> AudioStream {
        Box::pin(self.stream_events(request).filter_map(|event| {
            future::ready(match event {
                SpeechEvent::Audio(chunk) => Some(Ok::<_, SkaldError>(chunk)),
                SpeechEvent::Finished(_) => None,
            })
        }))
    }

    /// Stream a prepared request as [`SpeechEvent`]s.
    ///
    /// The stream ends with one [`SpeechEvent::Finished`] whose
    /// [`StreamEnd`] says which backend answered and whether its output was
    /// complete. Cache hits report [`CACHE_SOURCE`]; empty text finishes at
    /// the silent backend without dispatching.
    pub fn stream_events(&self, request: &SynthesisRequest) -> SpeechEventStream {
        if request.is_empty() {
            return Box::pin(stream::iter([SpeechEvent::Finished(StreamEnd {
                backend: SILENT_BACKEND.to_string(),
                complete: true,
                terminal: true,
            })]));
        }

        let key = Fingerprint::of(request);
        if let Some(audio) = self.cache.try_get(&key) {
            debug!(fingerprint = ?key, "replaying audio from cache");
            return Box::pin(stream::iter([
                SpeechEvent::Audio(audio.to_vec()),
                SpeechEvent::Finished(StreamEnd {
                    backend: CACHE_SOURCE.to_string(),
                    complete: true,
                    terminal: false,
                }),
            ]));
        }

        Box::pin(CachingStream {
            inner: self.orchestrator.synthesize_streaming(request),
            cache: Arc::clone(&self.cache),
            key,
            buffer: Vec::new(),
        })
    }

    /// Drop every cached entry, returning how many were removed.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Health of every real backend, in priority order.
    pub fn backend_health(&self) -> Vec<BackendHealth> {
        let health = self.orchestrator.health();
        self.orchestrator
            .backends()
            .iter()
            .filter(|d| !d.terminal)
            .map(|d| health.snapshot(&d.backend_id))
            .collect()
    }

    /// Make a backend immediately eligible again.
    pub fn reset_backend(&self, backend_id: &str) -> Result<()> {
        self.known_backend(backend_id)?;
        self.orchestrator.health().reset(backend_id);
        Ok(())
    }

    /// Quota left for a backend; `Ok(None)` if it is not rate limited.
    pub fn remaining_quota(&self, backend_id: &str) -> Result<Option<Remaining>> {
        self.known_backend(backend_id)?;
        Ok(self.orchestrator.limiter().remaining(backend_id))
    }

    /// Reachability of every backend. Does not affect health.
    pub async fn probe_backends(&self) -> Vec<BackendProbe> {
        self.orchestrator.probe().await
    }

    /// Provider-side quota of the primary backend.
    pub async fn usage(&self) -> Result<QuotaUsage> {
        let primary = self.orchestrator.primary().ok_or(SkaldError::NoBackend)?;
        primary.backend.usage().await
    }

    /// Periodically drop expired cache entries.
    ///
    /// The task holds only a weak reference and exits once the synthesizer
    /// is dropped; abort the handle to stop it sooner.
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<AudioCache> = Arc::downgrade(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "swept expired audio");
                }
            }
        })
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    fn known_backend(&self, backend_id: &str) -> Result<()> {
        if self
            .orchestrator
            .backends()
            .iter()
            .any(|d| !d.terminal && d.backend_id == backend_id)
        {
            Ok(())
        } else {
            Err(SkaldError::InvalidInput(format!(
                "unknown backend '{backend_id}'"
            )))
        }
    }
}

/// Backend id reported for cache hits.
pub const CACHE_SOURCE: &str = "cache";

#[async_trait]
impl SpeechGateway for SpeechSynthesizer {
    async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<Vec<u8>> {
        SpeechSynthesizer::generate_speech(self, text, voice_id, settings).await
    }

    async fn stream_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<AudioStream> {
        SpeechSynthesizer::stream_speech(self, text, voice_id, settings).await
    }
}

pin_project! {
    /// Forwards orchestrator events while buffering the audio, committing
    /// the buffer to the cache on a cacheable end event.
    ///
    /// Dropping it before the end drops the buffer with it.
    struct CachingStream {
        #[pin]
        inner: SpeechEventStream,
        cache: Arc<AudioCache>,
        key: Fingerprint,
        buffer: Vec<u8>,
    }
}

impl Stream for CachingStream {
    type Item = SpeechEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let event = ready!(this.inner.poll_next(cx));
        match &event {
            Some(SpeechEvent::Audio(chunk)) => this.buffer.extend_from_slice(chunk),
            Some(SpeechEvent::Finished(end)) => {
                let audio = std::mem::take(this.buffer);
                if end.is_cacheable() && !audio.is_empty() {
                    this.cache.put(*this.key, audio);
                } else if !end.complete {
                    warn!(backend = %end.backend, "stream ended incomplete, not caching");
                }
            }
            None => {}
        }
        Poll::Ready(event)
    }
}
