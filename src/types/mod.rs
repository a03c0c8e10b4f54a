//! Public types for the Skald API.

mod event;
mod format;
mod request;
mod settings;
mod usage;

pub use event::{AudioStream, SpeechEvent, StreamEnd, SynthesisOutcome};
pub use format::AudioFormat;
pub use request::{SynthesisRequest, normalize_text};
pub use settings::{MAX_SPEED, MIN_SPEED, SynthesisSettings};
pub use usage::QuotaUsage;
