//! Synthesis request value object

use super::SynthesisSettings;

/// A normalized, immutable synthesis request.
///
/// Used both as the cache key input and as the payload forwarded to
/// backends, so two requests that normalize to the same text, voice and
/// settings are interchangeable.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    text: String,
    voice_id: String,
    settings: SynthesisSettings,
}

impl SynthesisRequest {
    /// Build a request, normalizing text and clamping settings.
    pub fn new(
        text: impl AsRef<str>,
        voice_id: impl Into<String>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            text: normalize_text(text.as_ref()),
            voice_id: voice_id.into().trim().to_string(),
            settings: settings.normalized(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Number of characters billed against character quotas.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether there is nothing to speak.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Trim and collapse every run of whitespace to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
