//! Caching subsystem.
//!
//! - [`Fingerprint`]: stable SHA-256 key over the normalized text, voice
//!   and synthesis settings of a request.
//! - [`AudioCache`]: byte-budgeted LRU + TTL store of synthesized audio,
//!   owned by [`SpeechSynthesizer`](crate::SpeechSynthesizer). See the
//!   [`audio`] module docs for eviction and expiry rules.

pub mod audio;
mod fingerprint;

pub use audio::{AudioCache, CacheConfig, CacheEntry, CacheStats};
pub use fingerprint::Fingerprint;
