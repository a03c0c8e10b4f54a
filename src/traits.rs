//! Core SpeechGateway trait

use async_trait::async_trait;

use crate::Result;
use crate::types::{AudioStream, SynthesisSettings};

/// The seam calling layers depend on.
///
/// Lets conversation or UI code speak text without knowing about caching,
/// quotas or which engine ends up producing the audio, and lets tests swap
/// in a fake.
#[async_trait]
pub trait SpeechGateway: Send + Sync {
    /// Synthesize `text` fully. An empty buffer means no backend could speak.
    async fn generate_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<Vec<u8>>;

    /// Synthesize `text` as encoded chunks, in playback order.
    async fn stream_speech(
        &self,
        text: &str,
        voice_id: &str,
        settings: &SynthesisSettings,
    ) -> Result<AudioStream>;
}
