//! Output audio format tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SkaldError;

/// Encoding of the audio a backend should produce.
///
/// Tags follow the `codec_samplerate[_bitrate]` convention used by cloud
/// TTS APIs and double as the canonical form in cache fingerprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioFormat {
    #[serde(rename = "mp3_22050_32")]
    Mp3_22050_32,
    #[default]
    #[serde(rename = "mp3_44100_128")]
    Mp3_44100_128,
    #[serde(rename = "pcm_16000")]
    Pcm16000,
    #[serde(rename = "pcm_22050")]
    Pcm22050,
    #[serde(rename = "pcm_24000")]
    Pcm24000,
    #[serde(rename = "pcm_44100")]
    Pcm44100,
    #[serde(rename = "ulaw_8000")]
    Ulaw8000,
}

impl AudioFormat {
    /// Canonical tag, e.g. `"mp3_44100_128"`.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3_22050_32 => "mp3_22050_32",
            AudioFormat::Mp3_44100_128 => "mp3_44100_128",
            AudioFormat::Pcm16000 => "pcm_16000",
            AudioFormat::Pcm22050 => "pcm_22050",
            AudioFormat::Pcm24000 => "pcm_24000",
            AudioFormat::Pcm44100 => "pcm_44100",
            AudioFormat::Ulaw8000 => "ulaw_8000",
        }
    }

    /// MIME type of the encoded audio.
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3_22050_32 | AudioFormat::Mp3_44100_128 => "audio/mpeg",
            AudioFormat::Ulaw8000 => "audio/basic",
            _ => "audio/pcm",
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(self) -> u32 {
        match self {
            AudioFormat::Ulaw8000 => 8_000,
            AudioFormat::Pcm16000 => 16_000,
            AudioFormat::Mp3_22050_32 | AudioFormat::Pcm22050 => 22_050,
            AudioFormat::Pcm24000 => 24_000,
            AudioFormat::Mp3_44100_128 | AudioFormat::Pcm44100 => 44_100,
        }
    }

    const ALL: [AudioFormat; 7] = [
        AudioFormat::Mp3_22050_32,
        AudioFormat::Mp3_44100_128,
        AudioFormat::Pcm16000,
        AudioFormat::Pcm22050,
        AudioFormat::Pcm24000,
        AudioFormat::Pcm44100,
        AudioFormat::Ulaw8000,
    ];
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = SkaldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AudioFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| SkaldError::InvalidInput(format!("unknown audio format: {s}")))
    }
}
