//! Synthesis results and stream events

use std::pin::Pin;

use futures_util::Stream;

use crate::Result;

/// Raw stream of audio chunks produced by a backend.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Result of a non-streaming orchestrator call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub audio: Vec<u8>,
    /// Id of the backend that produced the audio.
    pub backend: String,
    /// Whether the silent terminal backend answered (no real audio).
    pub terminal: bool,
}

impl SynthesisOutcome {
    /// Whether real audio was produced and may be cached.
    pub fn is_cacheable(&self) -> bool {
        !self.terminal && !self.audio.is_empty()
    }
}

/// Item of an orchestrator stream.
///
/// Every stream ends with exactly one [`SpeechEvent::Finished`] unless the
/// consumer drops it first.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// A chunk of encoded audio.
    Audio(Vec<u8>),
    /// Terminal event.
    Finished(StreamEnd),
}

/// How an orchestrator stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnd {
    /// Backend that served the stream.
    pub backend: String,
    /// `true` when the backend delivered its whole output.
    pub complete: bool,
    /// Whether the silent terminal backend answered.
    pub terminal: bool,
}

impl StreamEnd {
    /// Whether the buffered audio may be committed to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.complete && !self.terminal
    }
}
