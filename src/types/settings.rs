//! Voice synthesis settings

use serde::{Deserialize, Serialize};

use super::AudioFormat;

/// Slowest speaking rate accepted; lower values are clamped.
pub const MIN_SPEED: f32 = 0.25;
/// Fastest speaking rate accepted; higher values are clamped.
pub const MAX_SPEED: f32 = 4.0;

/// Numeric voice parameters plus the output format.
///
/// Values are clamped into range on every setter, so a constructed value is
/// always valid and can be forwarded to any backend or hashed into a cache
/// key as-is.
///
/// ```rust
/// # use skald::{AudioFormat, SynthesisSettings};
/// let settings = SynthesisSettings::new()
///     .stability(0.4)
///     .similarity(0.9)
///     .speed(1.1)
///     .format(AudioFormat::Pcm16000);
/// assert_eq!(settings.stability, 0.4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Voice stability, 0–1. Default: 0.5.
    pub stability: f32,
    /// Similarity to the reference voice, 0–1. Default: 0.75.
    pub similarity: f32,
    /// Style exaggeration, 0–1. Default: 0.0.
    pub style: f32,
    /// Speaking rate multiplier. Default: 1.0.
    pub speed: f32,
    /// Output encoding. Default: `mp3_44100_128`.
    pub format: AudioFormat,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity: 0.75,
            style: 0.0,
            speed: 1.0,
            format: AudioFormat::default(),
        }
    }
}

impl SynthesisSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stability(mut self, value: f32) -> Self {
        self.stability = unit(value);
        self
    }

    pub fn similarity(mut self, value: f32) -> Self {
        self.similarity = unit(value);
        self
    }

    pub fn style(mut self, value: f32) -> Self {
        self.style = unit(value);
        self
    }

    pub fn speed(mut self, value: f32) -> Self {
        self.speed = if value.is_finite() {
            value.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            1.0
        };
        self
    }

    pub fn format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    /// Re-clamp every field. Used for values built by struct literal or
    /// deserialized from config.
    pub fn normalized(self) -> Self {
        Self::new()
            .stability(self.stability)
            .similarity(self.similarity)
            .style(self.style)
            .speed(self.speed)
            .format(self.format)
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
