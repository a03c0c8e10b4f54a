//! The synthesis contract every backend implements.
//!
//! The orchestrator depends on exactly this trait, never on backend-specific
//! types, so adding a provider means implementing [`SpeechBackend`] and
//! registering it in the builder.
//!
//! # Failure semantics
//!
//! Backends report failure through [`SkaldError`](crate::SkaldError). The
//! variant matters for logs ([`FailureKind`](crate::FailureKind)) and for
//! [`RetryingBackend`](super::RetryingBackend), but the orchestrator treats
//! every failure the same way: count it and move to the next backend.
//!
//! # Example
//!
//! ```ignore
//! #[async_trait]
//! impl SpeechBackend for Beep {
//!     fn name(&self) -> &str { "beep" }
//!
//!     async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
//!         Ok(beep_for(request.char_count()))
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream;

use crate::types::{AudioStream, QuotaUsage, SynthesisRequest};
use crate::{Result, SkaldError};

/// A named text-to-speech provider.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Backend id used for health, quota, logs and metrics.
    fn name(&self) -> &str;

    /// Whether [`synthesize_stream`](Self::synthesize_stream) delivers audio
    /// incrementally. When `false` the orchestrator calls
    /// [`synthesize`](Self::synthesize) and emits one chunk.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Synthesize the whole request.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;

    /// Synthesize as a stream of encoded chunks.
    ///
    /// Default implementation synthesizes fully and yields one chunk.
    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream> {
        let audio = self.synthesize(request).await?;
        Ok(Box::pin(stream::once(async move { Ok::<_, SkaldError>(audio) })))
    }

    /// Readiness probe, used out of band (never on the request path).
    async fn is_reachable(&self) -> bool {
        true
    }

    /// Character quota reported by the provider, if it has one.
    async fn usage(&self) -> Result<QuotaUsage> {
        Err(SkaldError::NotImplemented("usage"))
    }
}
