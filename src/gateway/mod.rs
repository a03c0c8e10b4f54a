//! Synthesis facade

mod builder;
mod synthesizer;

pub use builder::{Skald, SkaldBuilder};
pub use synthesizer::{CACHE_SOURCE, SpeechSynthesizer};
