//! Deterministic cache keys for synthesis requests.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::{SynthesisRequest, SynthesisSettings};

/// Version tag mixed into every key; bump when the encoding changes.
const ENCODING_VERSION: &str = "skald/v1";

/// SHA-256 digest of the canonical encoding of a [`SynthesisRequest`].
///
/// Stable across processes and platforms: fields are encoded in a fixed
/// order, strings are length-prefixed and numbers are rendered with exactly
/// three decimals.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint an already normalized request.
    pub fn of(request: &SynthesisRequest) -> Self {
        let digest = Sha256::digest(canonical_encoding(request).as_bytes());
        Self(digest.into())
    }

    /// Normalize the inputs and fingerprint them.
    pub fn compute(text: &str, voice_id: &str, settings: &SynthesisSettings) -> Self {
        Self::of(&SynthesisRequest::new(text, voice_id, *settings))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

fn canonical_encoding(request: &SynthesisRequest) -> String {
    let s = request.settings();
    let text = request.text();
    let voice = request.voice_id();
    format!(
        "{ENCODING_VERSION}\u{1f}{}:{text}\u{1f}{}:{voice}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        text.len(),
        voice.len(),
        number(s.stability),
        number(s.similarity),
        number(s.style),
        number(s.speed),
        s.format.as_str(),
    )
}

// Adding 0.0 folds -0.0 into 0.0 so both render identically.
fn number(value: f32) -> String {
    format!("{:.3}", value + 0.0)
}
