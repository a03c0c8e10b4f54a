//! Skald - resilient text-to-speech pipeline
//!
//! Turns text into audio while surviving failures of a remote synthesis
//! provider. Requests pass through a content-addressed audio cache, then a
//! fallback orchestrator that walks the configured backends in priority
//! order, skipping those in cooldown or over their local quota, and ends at
//! a silent terminal backend so that running out of options yields empty
//! audio rather than an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use skald::{RateLimitConfig, Skald, SynthesisSettings};
//!
//! #[tokio::main]
//! async fn main() -> skald::Result<()> {
//!     let synth = Skald::builder()
//!         .elevenlabs("xi-your-key")
//!         .rate_limit("elevenlabs", RateLimitConfig::new().max_requests(20))
//!         .local_command("espeak", "espeak-ng", ["--stdout", "{text}"])
//!         .build()?;
//!
//!     let audio = synth
//!         .generate_speech("Hello there", "21m00Tcm4TlvDq8ikWAM", &SynthesisSettings::default())
//!         .await?;
//!
//!     if audio.is_empty() {
//!         eprintln!("no backend available");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Streaming Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use skald::{Skald, SynthesisSettings};
//!
//! # async fn run() -> skald::Result<()> {
//! let synth = Skald::builder()
//!     .local_command("espeak", "espeak-ng", ["--stdout", "{text}"])
//!     .build()?;
//!
//! let mut stream = synth
//!     .stream_speech("Streaming speech", "en", &SynthesisSettings::default())
//!     .await?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     // hand chunk to the audio sink
//!     # let _ = chunk;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod limiter;
pub mod orchestrator;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use error::{FailureKind, Result, SkaldError};
pub use gateway::{CACHE_SOURCE, Skald, SkaldBuilder, SpeechSynthesizer};
pub use traits::SpeechGateway;

pub use backends::{
    CommandBackend, DEFAULT_STREAM_BUFFER, RetryConfig, RetryingBackend, SILENT_BACKEND,
    SilentBackend, SpeechBackend, spawn_producer,
};
#[cfg(feature = "elevenlabs")]
pub use backends::{ELEVENLABS_BACKEND, ElevenLabsClient};
pub use cache::{AudioCache, CacheConfig, CacheEntry, CacheStats, Fingerprint};
pub use health::{BackendHealth, BackendState, HealthConfig, HealthTracker};
pub use limiter::{Admission, RateLimitConfig, RateLimiter, Remaining};
pub use orchestrator::{
    BackendDescriptor, BackendProbe, FallbackOrchestrator, OrchestratorConfig, SpeechEventStream,
};

// Re-export all types
pub use types::{
    AudioFormat, AudioStream, MAX_SPEED, MIN_SPEED, QuotaUsage, SpeechEvent, StreamEnd,
    SynthesisOutcome, SynthesisRequest, SynthesisSettings, normalize_text,
};
