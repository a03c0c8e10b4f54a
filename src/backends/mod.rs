//! Synthesis backends.
//!
//! Every tier of the fallback table implements [`SpeechBackend`]: the cloud
//! primary ([`ElevenLabsClient`]), local engines ([`CommandBackend`]) and the
//! always-succeeding [`SilentBackend`] at the end.

pub mod backpressure;
pub mod command;
#[cfg(feature = "elevenlabs")]
pub mod elevenlabs;
pub mod retry;
pub mod silent;
pub mod traits;

pub use backpressure::{DEFAULT_STREAM_BUFFER, spawn_producer};
pub use command::CommandBackend;
#[cfg(feature = "elevenlabs")]
pub use elevenlabs::{ELEVENLABS_BACKEND, ElevenLabsClient};
pub use retry::{RetryConfig, RetryingBackend};
pub use silent::{SILENT_BACKEND, SilentBackend};
pub use traits::SpeechBackend;
