//! Terminal backend that always succeeds with no audio.

use async_trait::async_trait;

use super::SpeechBackend;
use crate::Result;
use crate::types::SynthesisRequest;

/// Backend id of [`SilentBackend`].
pub const SILENT_BACKEND: &str = "silent";

/// Always-available last resort.
///
/// Placed at the end of every backend table so that exhausting the real
/// backends yields "no audio" instead of an error. Its output is never
/// cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentBackend;

#[async_trait]
impl SpeechBackend for SilentBackend {
    fn name(&self) -> &str {
        SILENT_BACKEND
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
